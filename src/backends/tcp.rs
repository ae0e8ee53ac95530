//! TCP transport.

use crate::backends::{BoxedStream, Connector};

use async_trait::async_trait;
use std::io;
use tokio::net::TcpStream;

/// Connects to the engine over TCP (`host:port`).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    /// Creates a connector for `host:port`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    fn address(&self) -> String {
        format!("tcp://{}", self.address)
    }

    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = TcpStream::connect(&self.address).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
