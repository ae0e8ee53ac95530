//! Engine info over the scan socket.

use crate::core::{EngineInfo, InfoSource, ScanError};
use crate::manager::ScanQueue;

use async_trait::async_trait;

/// Queries the virus definitions version with the `VPS` command.
///
/// The query goes through the scan queue, so it never overlaps a scan.
/// The daemon only reports the definitions version, which fills both
/// fields of [`EngineInfo`].
#[derive(Debug, Clone)]
pub struct SocketInfoSource {
    queue: ScanQueue,
}

impl SocketInfoSource {
    /// Creates a source that submits queries to `queue`.
    pub fn new(queue: ScanQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl InfoSource for SocketInfoSource {
    fn name(&self) -> &str {
        "socket"
    }

    async fn query(&self) -> Result<EngineInfo, ScanError> {
        let version = self.queue.submit_info().await?;
        Ok(EngineInfo::new(version.clone(), version))
    }
}
