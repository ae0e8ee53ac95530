//! Transports that reach the engine's scan socket.
//!
//! A [`Connector`] opens one bidirectional byte stream per call. The
//! connection manager owns the stream afterwards, so implementations only
//! need to know how to dial.
//!
//! ## Available Connectors
//!
//! - [`unix`] - Unix domain socket (the engine's default transport)
//! - [`tcp`] - TCP, for engines exposed on a port
//! - [`mock`] - An in-memory engine for tests
//!
//! ## Implementing a Custom Connector
//!
//! ```rust,ignore
//! use scanline::backends::{BoxedStream, Connector};
//! use async_trait::async_trait;
//!
//! #[derive(Debug)]
//! pub struct TunnelConnector { /* ... */ }
//!
//! #[async_trait]
//! impl Connector for TunnelConnector {
//!     fn address(&self) -> String {
//!         "tunnel://engine".to_string()
//!     }
//!
//!     async fn connect(&self) -> std::io::Result<BoxedStream> {
//!         todo!()
//!     }
//! }
//! ```

pub mod mock;
pub mod tcp;

#[cfg(unix)]
pub mod unix;

pub use mock::{MockEngine, ScriptedReply};
pub use tcp::TcpConnector;

#[cfg(unix)]
pub use unix::UnixConnector;

use crate::core::{ScanError, SocketAddress};

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream to the engine.
pub trait EngineStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> EngineStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A boxed engine stream.
pub type BoxedStream = Box<dyn EngineStream>;

/// Opens connections to the engine.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Human-readable address, used in logs and errors.
    fn address(&self) -> String;

    /// Opens a new stream.
    async fn connect(&self) -> io::Result<BoxedStream>;
}

/// A shared connector.
pub type ArcConnector = Arc<dyn Connector>;

/// Builds the connector for a configured socket address.
pub fn connector_for(address: &SocketAddress) -> Result<ArcConnector, ScanError> {
    match address {
        #[cfg(unix)]
        SocketAddress::Unix(path) => Ok(Arc::new(UnixConnector::new(path.clone()))),
        #[cfg(not(unix))]
        SocketAddress::Unix(_) => Err(ScanError::configuration(
            "Unix sockets are not supported on this platform",
        )),
        SocketAddress::Tcp(addr) => Ok(Arc::new(TcpConnector::new(addr.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_for_tcp() {
        let connector = connector_for(&SocketAddress::Tcp("127.0.0.1:5037".into())).unwrap();
        assert_eq!(connector.address(), "tcp://127.0.0.1:5037");
    }

    #[cfg(unix)]
    #[test]
    fn test_connector_for_unix() {
        let connector = connector_for(&SocketAddress::default()).unwrap();
        assert_eq!(connector.address(), "unix:/var/run/avast/scan.sock");
    }
}
