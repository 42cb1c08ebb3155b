//! Unix domain socket transport. Grounded on
//! `ipc/unix_domain_socket.rs`'s listener/stream setup, stripped of the
//! benchmark-specific message framing and multi-client bookkeeping. The
//! owning server is responsible for unlinking the socket path on shutdown,
//! same as the teacher's `owns_socket_file` convention.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::debug;

use super::ByteStreamEndpoint;

pub struct UnixEndpoint {
    stream: UnixStream,
}

impl UnixEndpoint {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    pub async fn connect(path: &str) -> std::io::Result<Self> {
        debug!("connecting Unix domain socket endpoint to {}", path);
        Ok(Self::new(UnixStream::connect(path).await?))
    }

    pub async fn accept(listener: &UnixListener) -> std::io::Result<Self> {
        let (stream, _addr) = listener.accept().await?;
        debug!("accepted Unix domain socket connection");
        Ok(Self::new(stream))
    }
}

#[async_trait]
impl ByteStreamEndpoint for UnixEndpoint {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }
}
