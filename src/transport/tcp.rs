//! TCP transport (spec §9's "dynamic dispatch" design note). Grounded on
//! `ipc/tcp_socket.rs`'s client/server socket setup, stripped of the
//! benchmark-specific message framing and multi-client bookkeeping.

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use super::ByteStreamEndpoint;

pub struct TcpEndpoint {
    stream: TcpStream,
}

impl TcpEndpoint {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let std_stream = stream.into_std()?;
        let socket = socket2::Socket::from(std_stream.try_clone()?);
        socket.set_nodelay(true)?;
        Ok(Self {
            stream: TcpStream::from_std(std_stream)?,
        })
    }

    pub async fn connect(addr: &str) -> std::io::Result<Self> {
        debug!("connecting TCP endpoint to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream)
    }

    pub async fn accept(listener: &TcpListener) -> std::io::Result<Self> {
        let (stream, peer) = listener.accept().await?;
        debug!("accepted TCP connection from {}", peer);
        Self::new(stream)
    }
}

#[async_trait]
impl ByteStreamEndpoint for TcpEndpoint {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stream.read(buf).await
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(buf).await?;
        self.stream.flush().await
    }
}
