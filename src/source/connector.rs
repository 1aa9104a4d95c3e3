//! Transport seam for opening the upstream byte stream.

use std::io;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::net::TcpStream;

/// Read half of an open upstream connection.
pub type Upstream = Box<dyn AsyncRead + Send + Unpin>;

/// Opens upstream connections.
///
/// The engine calls [`connect`](Connector::connect) whenever it needs a
/// connection and none is live. Implementations should not retry on their
/// own: the engine owns the retry policy.
///
/// An error of kind [`io::ErrorKind::Interrupted`] is reported to callers as
/// [`FanoutError::Interrupted`](crate::FanoutError::Interrupted) and is never
/// retried.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection to `host:port`.
    async fn connect(&self, host: &str, port: u16) -> io::Result<Upstream>;
}

/// Connects over TCP, e.g. to PulseAudio's `module-simple-protocol-tcp`.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    /// Creates a TCP connector with default socket options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `TCP_NODELAY` on new sockets.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<Upstream> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(Box::new(stream))
    }
}
