//! Byte-stream endpoint abstraction (spec §1's "external collaborator") and
//! concrete transports over it. Grounded on the teacher's `ipc::IpcTransport`
//! trait and its TCP/Unix-domain-socket implementations, simplified to a
//! plain duplex byte stream since `connection::Connection` owns its own
//! NumHeader framing rather than delegating framing to the transport.

pub mod tcp;
pub mod unix;

use async_trait::async_trait;

pub use tcp::TcpEndpoint;
pub use unix::UnixEndpoint;

/// A duplex byte stream a `Connection` drives: read bytes in, write bytes
/// out. No message framing at this layer (spec §1).
#[async_trait]
pub trait ByteStreamEndpoint: Send {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;
}
