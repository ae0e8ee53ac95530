//! Unix domain socket transport.

use crate::backends::{BoxedStream, Connector};

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;

/// Connects to the engine over a Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    /// Creates a connector for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Connector for UnixConnector {
    fn address(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    async fn connect(&self) -> io::Result<BoxedStream> {
        let stream = UnixStream::connect(&self.path).await?;
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let connector = UnixConnector::new(&path);
        let mut stream = connector.connect().await.unwrap();
        stream.write_all(b"VPS\n").await.unwrap();

        assert_eq!(&server.await.unwrap(), b"VPS\n");
    }

    #[tokio::test]
    async fn test_missing_socket_fails() {
        let dir = tempfile::tempdir().unwrap();
        let connector = UnixConnector::new(dir.path().join("absent.sock"));
        assert!(connector.connect().await.is_err());
    }
}
