//! The public scan client.

use crate::aggregator::Aggregator;
use crate::backends::{connector_for, ArcConnector};
use crate::connection::{ConnectionManager, ConnectionMetrics, ConnectionState};
use crate::core::{ArcInfoSource, ClientConfig, EngineInfo, ScanError, ScanTarget, ScanVerdict};
use crate::info::SocketInfoSource;
use crate::manager::{ScanHandle, ScanQueue, ScanSession};

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Builder for creating a [`ScanClient`].
#[derive(Default)]
pub struct ScanClientBuilder {
    config: ClientConfig,
    connector: Option<ArcConnector>,
    info_source: Option<ArcInfoSource>,
}

impl ScanClientBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses `connector` instead of the one derived from the socket address.
    pub fn with_connector(mut self, connector: ArcConnector) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Answers [`ScanClient::get_info`] with `source` instead of `VPS`.
    pub fn with_info_source(mut self, source: ArcInfoSource) -> Self {
        self.info_source = Some(source);
        self
    }

    /// Builds the client and starts its queue worker.
    ///
    /// Must be called from within a Tokio runtime. No connection is opened
    /// until the first request or an explicit [`ScanClient::connect`].
    pub fn build(self) -> Result<ScanClient, ScanError> {
        self.config.validate()?;

        let connector = match self.connector {
            Some(connector) => connector,
            None => connector_for(&self.config.socket_address)?,
        };

        let aggregator = Arc::new(Aggregator::new());
        let connections = Arc::new(ConnectionManager::new(
            connector,
            self.config.clone(),
            aggregator.clone(),
        ));
        let session = Arc::new(ScanSession::new(
            connections.clone(),
            aggregator.clone(),
            self.config.request_timeout,
        ));
        let (queue, worker) = ScanQueue::start(session);

        let info_source = self
            .info_source
            .unwrap_or_else(|| Arc::new(SocketInfoSource::new(queue.clone())));

        tracing::debug!(
            address = %connections.address(),
            info_source = info_source.name(),
            request_timeout_ms = self.config.request_timeout.as_millis() as u64,
            "Scan client built"
        );

        Ok(ScanClient {
            config: self.config,
            connections,
            aggregator,
            queue,
            info_source,
            worker,
        })
    }
}

/// An asynchronous client for the engine's scan socket.
///
/// All scans share one connection and run one at a time in submission
/// order; callers may submit concurrently.
///
/// # Examples
///
/// ```rust,no_run
/// use scanline::prelude::*;
///
/// # async fn example() -> Result<(), ScanError> {
/// let client = ScanClient::builder()
///     .with_config(ClientConfig::new().with_socket("/var/run/avast/scan.sock"))
///     .build()?;
///
/// let info = client.get_info().await?;
/// println!("definitions: {}", info.virus_definitions_version);
///
/// let verdict = client.scan_file("/tmp/upload.zip").await?;
/// if !verdict.is_safe() {
///     println!("rejected: {:?}", verdict.malware_names());
/// }
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ScanClient {
    config: ClientConfig,
    connections: Arc<ConnectionManager>,
    aggregator: Arc<Aggregator>,
    queue: ScanQueue,
    info_source: ArcInfoSource,
    worker: JoinHandle<()>,
}

impl ScanClient {
    /// Creates a new builder.
    pub fn builder() -> ScanClientBuilder {
        ScanClientBuilder::new()
    }

    /// Creates a client for `config` with the default connector and info source.
    pub fn new(config: ClientConfig) -> Result<Self, ScanError> {
        Self::builder().with_config(config).build()
    }

    /// Opens the connection now instead of on the first request.
    ///
    /// A no-op if already connected, unless `force_reconnect` is set.
    pub async fn connect(&self, force_reconnect: bool) -> Result<(), ScanError> {
        self.connections.connect(force_reconnect).await
    }

    /// Closes the connection. The next request reconnects.
    pub async fn close(&self) {
        self.connections.close().await;
    }

    /// Scans `path` and waits for its verdict.
    ///
    /// # Errors
    ///
    /// - `FileNotFound` - `path` does not exist (checked before queueing)
    /// - `ConnectionFailed` - the engine could not be reached or went away
    /// - `Engine` - the engine reported a fault for the path
    /// - `Timeout` - nothing arrived for the path within the request timeout
    pub async fn scan_file(&self, path: impl AsRef<Path>) -> Result<ScanVerdict, ScanError> {
        self.queue_scan(path).await?.wait().await
    }

    /// Queues a scan of `path` and returns a handle to it.
    pub async fn queue_scan(&self, path: impl AsRef<Path>) -> Result<ScanHandle, ScanError> {
        let target = ScanTarget::resolve(path).await?;
        if target.requested() != target.path() {
            tracing::debug!(
                requested = %target.requested().display(),
                canonical = %target,
                "Normalized scan target"
            );
        }
        self.queue.submit(target)
    }

    /// Queries the engine's version information.
    pub async fn get_info(&self) -> Result<EngineInfo, ScanError> {
        self.info_source.query().await
    }

    /// The most recent definitions version seen on the socket, if any.
    pub fn engine_version(&self) -> Option<String> {
        self.aggregator.engine_version()
    }

    /// The connection's lifecycle state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connections.state()
    }

    /// A snapshot of the connection counters.
    pub fn connection_metrics(&self) -> ConnectionMetrics {
        self.connections.metrics()
    }

    /// When the connection last became ready.
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.connections.last_ready_at()
    }

    /// Result entries held for in-flight or abandoned scans.
    pub fn pending_results(&self) -> usize {
        self.aggregator.pending_count()
    }

    /// The scan queue, for introspection.
    pub fn queue(&self) -> &ScanQueue {
        &self.queue
    }

    /// The client's configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns true while the queue worker is running.
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }
}
