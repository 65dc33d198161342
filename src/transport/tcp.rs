//! Plain TCP transport.

use tokio::net::TcpStream;

use super::{BoxFuture, Connector, Transport};
use crate::error::Result;

/// Connects with `tokio::net::TcpStream`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    /// Connector with `TCP_NODELAY` enabled.
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Enable or disable `TCP_NODELAY` on new connections.
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for TcpConnector {
    fn connect<'a>(
        &'a self,
        host: &'a str,
        port: u16,
    ) -> BoxFuture<'a, Result<Box<dyn Transport>>> {
        Box::pin(async move {
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(self.nodelay)?;
            tracing::debug!("Connected to {}:{}", host, port);
            Ok(Box::new(stream) as Box<dyn Transport>)
        })
    }
}
