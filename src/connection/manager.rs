//! Ownership of the single engine connection.

use crate::aggregator::Aggregator;
use crate::audit;
use crate::backends::{ArcConnector, BoxedStream};
use crate::connection::state::{ConnectionMetrics, ConnectionState};
use crate::core::{ClientConfig, ScanError};
use crate::protocol::{LineParser, Record};

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_BUFFER_SIZE: usize = 8 * 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

struct LiveConnection {
    writer: WriteHalf<BoxedStream>,
    reader_task: JoinHandle<()>,
    generation: u64,
}

struct Shared {
    address: String,
    state: RwLock<ConnectionState>,
    slot: tokio::sync::Mutex<Option<LiveConnection>>,
    metrics: Mutex<ConnectionMetrics>,
    last_ready: RwLock<Option<DateTime<Utc>>>,
    generation: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_state(&self, state: ConnectionState, reason: Option<&str>) {
        let name = state.name();
        let mut current = self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if current.name() == name {
            *current = state;
            return;
        }
        tracing::debug!(from = current.name(), to = name, "Connection state transition");
        *current = state;
        drop(current);
        audit::emit_connection_changed(&self.address, name, reason);
    }

    fn metrics(&self) -> std::sync::MutexGuard<'_, ConnectionMetrics> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Half-closes and forgets a connection taken out of the slot.
    async fn teardown(&self, live: LiveConnection, reason: &str) {
        self.set_state(ConnectionState::Closing, Some(reason));
        let mut writer = live.writer;
        match tokio::time::timeout(SHUTDOWN_GRACE, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(address = %self.address, error = %e, "Shutdown of write side failed");
            }
            Err(_) => {
                tracing::debug!(address = %self.address, "Shutdown of write side timed out");
            }
        }
        self.set_state(ConnectionState::Disconnected, Some(reason));
    }

    /// Called by the receive loop when its stream ends.
    async fn on_disconnect(&self, generation: u64, reason: &str) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().map(|live| live.generation) != Some(generation) {
            return;
        }
        let Some(live) = slot.take() else {
            return;
        };

        tracing::info!(
            address = %self.address,
            generation,
            reason,
            "Engine connection lost"
        );
        self.metrics().disconnects += 1;
        self.teardown(live, reason).await;
    }
}

/// Owns at most one live connection to the engine.
///
/// Bytes read from the socket are split into lines and classified by a
/// [`LineParser`], then handed to the [`Aggregator`] through a bounded
/// channel. The connection is closed when nothing arrives within
/// [`ClientConfig::idle_timeout`], when the peer closes it, or on any I/O
/// error; the next request reconnects.
pub struct ConnectionManager {
    connector: ArcConnector,
    config: ClientConfig,
    aggregator: Arc<Aggregator>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("address", &self.shared.address)
            .field("state", &self.shared.state().name())
            .finish()
    }
}

impl ConnectionManager {
    /// Creates a manager; no connection is opened until [`connect`](Self::connect).
    pub fn new(connector: ArcConnector, config: ClientConfig, aggregator: Arc<Aggregator>) -> Self {
        let shared = Arc::new(Shared {
            address: connector.address(),
            state: RwLock::new(ConnectionState::Disconnected),
            slot: tokio::sync::Mutex::new(None),
            metrics: Mutex::new(ConnectionMetrics::new()),
            last_ready: RwLock::new(None),
            generation: AtomicU64::new(0),
        });
        Self {
            connector,
            config,
            aggregator,
            shared,
        }
    }

    /// The engine address this manager dials.
    pub fn address(&self) -> &str {
        &self.shared.address
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// When the current (or last) connection became ready.
    pub fn last_ready_at(&self) -> Option<DateTime<Utc>> {
        *self
            .shared
            .last_ready
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A snapshot of the connection counters.
    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.metrics().clone()
    }

    /// Ensures a ready connection.
    ///
    /// Returns immediately if one is already open, unless `force_reconnect`
    /// is set, in which case the existing connection is closed first.
    pub async fn connect(&self, force_reconnect: bool) -> Result<(), ScanError> {
        let mut slot = self.shared.slot.lock().await;

        if let Some(live) = slot.as_ref() {
            if !force_reconnect && !live.reader_task.is_finished() {
                return Ok(());
            }
        }
        if let Some(live) = slot.take() {
            live.reader_task.abort();
            self.shared.teardown(live, "reconnect").await;
        }

        self.shared.set_state(
            ConnectionState::Connecting {
                since: Instant::now(),
            },
            None,
        );

        let stream = match self.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                self.shared
                    .set_state(ConnectionState::Disconnected, Some("connect failed"));
                return Err(e);
            }
        };

        let generation = self.shared.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = mpsc::channel(self.config.record_buffer.max(1));

        tokio::spawn(apply_records(rx, self.aggregator.clone(), generation));
        let reader_task = tokio::spawn(receive_loop(
            reader,
            tx,
            LineParser::with_max_line_length(self.config.max_line_length),
            self.config.idle_timeout(),
            self.shared.clone(),
            generation,
        ));

        *slot = Some(LiveConnection {
            writer,
            reader_task,
            generation,
        });
        *self
            .shared
            .last_ready
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Utc::now());
        self.shared.set_state(
            ConnectionState::Ready {
                since: Instant::now(),
                generation,
            },
            None,
        );

        tracing::info!(address = %self.shared.address, generation, "Connected to engine");
        Ok(())
    }

    async fn dial(&self) -> Result<BoxedStream, ScanError> {
        let policy = &self.config.reconnect;
        let connect_timeout = self.config.connect_timeout;
        let mut attempt = 0;

        loop {
            let delay = policy.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let attempt_started = Instant::now();
            let (error, timed_out) =
                match tokio::time::timeout(connect_timeout, self.connector.connect()).await {
                    Ok(Ok(stream)) => {
                        self.shared.metrics().record_attempt(true);
                        return Ok(stream);
                    }
                    Ok(Err(e)) => (e.to_string(), false),
                    Err(_) => (format!("timed out after {:?}", connect_timeout), true),
                };
            self.shared.metrics().record_attempt(false);

            attempt += 1;
            if !policy.allows_attempt(attempt) {
                tracing::warn!(
                    address = %self.shared.address,
                    attempts = attempt,
                    error = %error,
                    "Could not connect to engine"
                );
                if timed_out {
                    return Err(ScanError::timeout(
                        format!("connecting to {}", self.shared.address),
                        attempt_started.elapsed(),
                    ));
                }
                return Err(ScanError::connection_failed(&self.shared.address, error));
            }
            tracing::debug!(
                address = %self.shared.address,
                attempt,
                max_attempts = policy.max_attempts,
                error = %error,
                "Retrying connection"
            );
        }
    }

    /// Writes one command line to the engine.
    ///
    /// Returns the generation of the connection the line was written on. A
    /// write failure closes the connection.
    pub async fn send_line(&self, line: &str) -> Result<u64, ScanError> {
        let mut slot = self.shared.slot.lock().await;
        let live = slot
            .as_mut()
            .ok_or_else(|| ScanError::connection_failed(&self.shared.address, "not connected"))?;

        let written: std::io::Result<()> = async {
            live.writer.write_all(line.as_bytes()).await?;
            live.writer.flush().await
        }
        .await;

        match written {
            Ok(()) => Ok(live.generation),
            Err(e) => {
                tracing::warn!(address = %self.shared.address, error = %e, "Write to engine failed");
                if let Some(live) = slot.take() {
                    live.reader_task.abort();
                    self.shared.metrics().disconnects += 1;
                    self.shared.teardown(live, "write failed").await;
                }
                Err(ScanError::connection_failed(
                    &self.shared.address,
                    e.to_string(),
                ))
            }
        }
    }

    /// Closes the connection. Idempotent.
    pub async fn close(&self) {
        let mut slot = self.shared.slot.lock().await;
        match slot.take() {
            Some(live) => {
                live.reader_task.abort();
                self.shared.teardown(live, "closed by client").await;
                tracing::info!(address = %self.shared.address, "Engine connection closed");
            }
            None => self
                .shared
                .set_state(ConnectionState::Disconnected, Some("closed by client")),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.shared.slot.try_lock() {
            if let Some(live) = slot.take() {
                live.reader_task.abort();
            }
        }
    }
}

async fn receive_loop(
    mut reader: ReadHalf<BoxedStream>,
    tx: mpsc::Sender<Record>,
    mut parser: LineParser,
    idle_timeout: Duration,
    shared: Arc<Shared>,
    generation: u64,
) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let reason = 'read: loop {
        let n = match tokio::time::timeout(idle_timeout, reader.read(&mut buf)).await {
            Err(_) => {
                shared.metrics().idle_timeouts += 1;
                break "idle timeout";
            }
            Ok(Ok(0)) => break "closed by engine",
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(address = %shared.address, error = %e, "Read from engine failed");
                break "read failed";
            }
        };

        let discarded_before = parser.lines_discarded();
        let records: Vec<Record> = parser.feed(&buf[..n]).collect();
        {
            let mut metrics = shared.metrics();
            metrics.records_received += records.len() as u64;
            metrics.lines_discarded += parser.lines_discarded() - discarded_before;
        }

        for record in records {
            tracing::trace!(kind = record.kind(), path = ?record.root_path(), "Record received");
            if tx.send(record).await.is_err() {
                break 'read "record channel closed";
            }
        }
    };

    drop(tx);
    shared.on_disconnect(generation, reason).await;
}

async fn apply_records(mut rx: mpsc::Receiver<Record>, aggregator: Arc<Aggregator>, generation: u64) {
    while let Some(record) = rx.recv().await {
        aggregator.record(record);
    }
    aggregator.connection_closed(generation);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockEngine;
    use crate::connection::ReconnectPolicy;

    fn manager(engine: &MockEngine, config: ClientConfig) -> ConnectionManager {
        ConnectionManager::new(
            Arc::new(engine.clone()),
            config,
            Arc::new(Aggregator::new()),
        )
    }

    fn fast_config() -> ClientConfig {
        ClientConfig::new().with_reconnect(
            ReconnectPolicy::new()
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    async fn wait_for_disconnect(manager: &ConnectionManager) {
        for _ in 0..200 {
            if manager.state().is_disconnected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection never dropped");
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let engine = MockEngine::new();
        let manager = manager(&engine, fast_config());

        manager.connect(false).await.unwrap();
        manager.connect(false).await.unwrap();

        assert!(manager.state().is_ready());
        assert_eq!(engine.connection_count(), 1);
        assert!(manager.last_ready_at().is_some());
    }

    #[tokio::test]
    async fn test_force_reconnect_opens_new_connection() {
        let engine = MockEngine::new();
        let manager = manager(&engine, fast_config());

        manager.connect(false).await.unwrap();
        let first = manager.state().generation();
        manager.connect(true).await.unwrap();

        assert_eq!(engine.connection_count(), 2);
        assert_ne!(manager.state().generation(), first);
    }

    #[tokio::test]
    async fn test_connect_retries_refused_attempts() {
        let engine = MockEngine::new();
        engine.refuse_next(2);
        let manager = manager(&engine, fast_config());

        manager.connect(false).await.unwrap();

        let metrics = manager.metrics();
        assert_eq!(metrics.connect_attempts, 3);
        assert_eq!(metrics.connect_failures, 2);
        assert_eq!(metrics.connect_successes, 1);
    }

    #[tokio::test]
    async fn test_connect_gives_up() {
        let engine = MockEngine::new();
        engine.set_unavailable(true);
        let manager = manager(&engine, fast_config());

        let err = manager.connect(false).await.unwrap_err();
        assert!(matches!(err, ScanError::ConnectionFailed { .. }));
        assert!(manager.state().is_disconnected());
    }

    #[derive(Debug)]
    struct SilentConnector;

    #[async_trait::async_trait]
    impl crate::backends::Connector for SilentConnector {
        fn address(&self) -> String {
            "silent".to_string()
        }

        async fn connect(&self) -> std::io::Result<BoxedStream> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_connect_timeout_surfaces_as_timeout() {
        let config = ClientConfig::new()
            .with_connect_timeout(Duration::from_millis(30))
            .with_reconnect(ReconnectPolicy::no_retry());
        let manager =
            ConnectionManager::new(Arc::new(SilentConnector), config, Arc::new(Aggregator::new()));

        let err = manager.connect(false).await.unwrap_err();
        assert!(matches!(err, ScanError::Timeout { .. }));
        assert!(manager.state().is_disconnected());
        assert_eq!(manager.metrics().connect_failures, 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let engine = MockEngine::new();
        let manager = manager(&engine, fast_config());

        manager.close().await;
        manager.connect(false).await.unwrap();
        manager.close().await;
        manager.close().await;

        assert!(manager.state().is_disconnected());
        let err = manager.send_line("VPS\n").await.unwrap_err();
        assert!(err.indicates_connection_loss());
    }

    #[tokio::test]
    async fn test_records_reach_aggregator() {
        let engine = MockEngine::new();
        let aggregator = Arc::new(Aggregator::new());
        let manager =
            ConnectionManager::new(Arc::new(engine.clone()), fast_config(), aggregator.clone());

        manager.connect(false).await.unwrap();
        manager.send_line("VPS\n").await.unwrap();

        for _ in 0..200 {
            if aggregator.engine_version().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(aggregator.engine_version().as_deref(), Some("24011004"));
        assert!(manager.metrics().records_received >= 1);
    }

    #[tokio::test]
    async fn test_peer_close_marks_disconnected() {
        let engine = MockEngine::new();
        let manager = manager(&engine, fast_config());

        manager.connect(false).await.unwrap();
        engine.drop_connections();
        wait_for_disconnect(&manager).await;

        assert_eq!(manager.metrics().disconnects, 1);
        manager.connect(false).await.unwrap();
        assert_eq!(engine.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_connection() {
        let engine = MockEngine::new();
        let config = fast_config()
            .with_connect_timeout(Duration::from_millis(20))
            .with_request_timeout(Duration::from_millis(20));
        let manager = manager(&engine, config);

        manager.connect(false).await.unwrap();
        wait_for_disconnect(&manager).await;

        assert_eq!(manager.metrics().idle_timeouts, 1);
    }
}
