//! One request/response exchange with the engine.

use crate::aggregator::Aggregator;
use crate::connection::ConnectionManager;
use crate::core::{ScanError, ScanTarget, ScanVerdict};
use crate::protocol::VPS_COMMAND;

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

enum Waited<T> {
    Ready(T),
    ConnectionLost,
    Deadline,
}

/// Sends one command and waits for its correlated outcome.
///
/// A session assumes it is the only request in flight; [`ScanQueue`]
/// guarantees that.
///
/// [`ScanQueue`]: crate::manager::ScanQueue
#[derive(Debug)]
pub struct ScanSession {
    connections: Arc<ConnectionManager>,
    aggregator: Arc<Aggregator>,
    request_timeout: Duration,
}

impl ScanSession {
    /// Creates a session over a connection and its aggregator.
    pub fn new(
        connections: Arc<ConnectionManager>,
        aggregator: Arc<Aggregator>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            connections,
            aggregator,
            request_timeout,
        }
    }

    /// The per-request deadline budget.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The deadline for a request starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.request_timeout
    }

    /// Resolves `path` and scans it.
    pub async fn scan(&self, path: &str, deadline: Instant) -> Result<ScanVerdict, ScanError> {
        let target = ScanTarget::resolve(path).await?;
        self.scan_target(&target, deadline).await
    }

    /// Scans an already resolved target.
    pub async fn scan_target(
        &self,
        target: &ScanTarget,
        deadline: Instant,
    ) -> Result<ScanVerdict, ScanError> {
        let key = target.key();
        let started = Instant::now();

        self.aggregator.begin_scan(key);
        let generation = match self.send(&target.command(), deadline, key).await {
            Ok(generation) => generation,
            Err(e) => {
                self.aggregator.finish_scan(key);
                return Err(e);
            }
        };
        tracing::debug!(path = %key, generation, "Scan command sent");

        let waited = self
            .wait(deadline, generation, || self.aggregator.poll_scan(key))
            .await;

        match waited {
            Waited::Ready(outcome) => outcome,
            Waited::ConnectionLost => match self.aggregator.finish_scan(key) {
                Some(outcome) => outcome,
                None => Err(ScanError::connection_failed(
                    self.connections.address(),
                    format!("connection closed while scanning {}", key),
                )),
            },
            Waited::Deadline => match self.aggregator.finish_scan(key) {
                Some(outcome) => {
                    tracing::debug!(
                        path = %key,
                        "Deadline reached without completion, returning partial verdict"
                    );
                    outcome
                }
                None => Err(ScanError::timeout(
                    format!("scan of {}", key),
                    started.elapsed(),
                )),
            },
        }
    }

    /// Asks the engine for its virus definitions version.
    pub async fn query_info(&self, deadline: Instant) -> Result<String, ScanError> {
        let started = Instant::now();

        let since = self.aggregator.begin_info();
        let generation = match self.send(VPS_COMMAND, deadline, "VPS").await {
            Ok(generation) => generation,
            Err(e) => {
                self.aggregator.finish_info();
                return Err(e);
            }
        };

        let waited = self
            .wait(deadline, generation, || self.aggregator.poll_info(since))
            .await;
        match waited {
            Waited::Ready(outcome) => outcome,
            Waited::ConnectionLost => {
                self.aggregator.finish_info();
                Err(ScanError::connection_failed(
                    self.connections.address(),
                    "connection closed during info query",
                ))
            }
            Waited::Deadline => {
                self.aggregator.finish_info();
                Err(ScanError::timeout("info query", started.elapsed()))
            }
        }
    }

    async fn send(&self, line: &str, deadline: Instant, what: &str) -> Result<u64, ScanError> {
        let started = Instant::now();
        let exchange = async {
            match self.connections.connect(false).await {
                Ok(()) => self.connections.send_line(line).await,
                Err(e) => Err(e),
            }
        };
        match tokio::time::timeout_at(deadline, exchange).await {
            Ok(result) => result,
            Err(_) => Err(ScanError::timeout(
                format!("sending {}", what),
                started.elapsed(),
            )),
        }
    }

    async fn wait<T>(
        &self,
        deadline: Instant,
        generation: u64,
        mut poll: impl FnMut() -> Option<T>,
    ) -> Waited<T> {
        loop {
            let changed = self.aggregator.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            if let Some(outcome) = poll() {
                return Waited::Ready(outcome);
            }
            if self.aggregator.is_connection_closed(generation) {
                return Waited::ConnectionLost;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return Waited::Deadline;
            }
        }
    }
}
