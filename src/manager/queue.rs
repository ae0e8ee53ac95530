//! FIFO queue that runs one engine request at a time.

use crate::audit;
use crate::core::{ScanError, ScanTarget, ScanVerdict};
use crate::manager::session::ScanSession;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Status of a queued scan.
#[derive(Debug, Clone)]
pub enum ScanStatus {
    /// Waiting behind earlier requests.
    Pending,
    /// The scan command has been (or is being) sent.
    InProgress,
    /// Scan completed successfully.
    Complete {
        /// The verdict.
        verdict: Box<ScanVerdict>,
    },
    /// Scan failed.
    Failed {
        /// Error message.
        error: String,
    },
}

type SharedStatus = Arc<RwLock<ScanStatus>>;

fn set_status(status: &SharedStatus, value: ScanStatus) {
    *status
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
}

/// A handle to a queued scan.
#[derive(Debug)]
pub struct ScanHandle {
    /// Unique identifier for this scan.
    pub id: String,
    status: SharedStatus,
    outcome: oneshot::Receiver<Result<ScanVerdict, ScanError>>,
}

impl ScanHandle {
    /// Returns the current status of the scan.
    pub fn status(&self) -> ScanStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Returns true if the scan finished, successfully or not.
    pub fn is_complete(&self) -> bool {
        matches!(
            self.status(),
            ScanStatus::Complete { .. } | ScanStatus::Failed { .. }
        )
    }

    /// Returns true if the scan is still waiting in the queue.
    pub fn is_pending(&self) -> bool {
        matches!(self.status(), ScanStatus::Pending)
    }

    /// Returns true if the scan is in progress.
    pub fn is_in_progress(&self) -> bool {
        matches!(self.status(), ScanStatus::InProgress)
    }

    /// Waits for the scan to finish and returns its outcome.
    pub async fn wait(self) -> Result<ScanVerdict, ScanError> {
        self.outcome
            .await
            .map_err(|_| ScanError::internal("scan queue stopped before the scan finished"))?
    }
}

enum Job {
    Scan {
        target: ScanTarget,
        status: SharedStatus,
        reply: oneshot::Sender<Result<ScanVerdict, ScanError>>,
    },
    Info {
        reply: oneshot::Sender<Result<String, ScanError>>,
    },
}

struct QueuedTask {
    id: String,
    enqueued_at: Instant,
    job: Job,
}

#[derive(Debug, Default)]
struct Counters {
    pending: AtomicU64,
    active: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Serializes scans and info queries over the single engine connection.
///
/// Tasks run strictly in submission order and a task does not start until
/// the previous one resolved, so at most one command is ever outstanding.
/// A failing task does not stop the queue. Clones share the same worker.
#[derive(Debug, Clone)]
pub struct ScanQueue {
    tx: mpsc::UnboundedSender<QueuedTask>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for QueuedTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedTask").field("id", &self.id).finish()
    }
}

impl ScanQueue {
    /// Starts the worker that drives `session`.
    ///
    /// The worker stops once every clone of the queue has been dropped.
    pub fn start(session: Arc<ScanSession>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(run_worker(rx, session, counters.clone()));
        (Self { tx, counters }, worker)
    }

    fn enqueue(&self, id: String, job: Job) -> Result<(), ScanError> {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        let task = QueuedTask {
            id,
            enqueued_at: Instant::now(),
            job,
        };
        self.tx.send(task).map_err(|_| {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            ScanError::internal("scan queue is not running")
        })
    }

    /// Queues a scan of an already resolved target.
    pub fn submit(&self, target: ScanTarget) -> Result<ScanHandle, ScanError> {
        let id = Uuid::new_v4().to_string();
        let status: SharedStatus = Arc::new(RwLock::new(ScanStatus::Pending));
        let (reply, outcome) = oneshot::channel();

        tracing::debug!(scan_id = %id, path = %target.key(), "Scan queued");
        self.enqueue(
            id.clone(),
            Job::Scan {
                target,
                status: status.clone(),
                reply,
            },
        )?;

        Ok(ScanHandle {
            id,
            status,
            outcome,
        })
    }

    /// Queues an info query and waits for its result.
    pub async fn submit_info(&self) -> Result<String, ScanError> {
        let (reply, outcome) = oneshot::channel();
        self.enqueue(Uuid::new_v4().to_string(), Job::Info { reply })?;
        outcome
            .await
            .map_err(|_| ScanError::internal("scan queue stopped before the query finished"))?
    }

    /// Tasks waiting to start.
    pub fn pending_count(&self) -> u64 {
        self.counters.pending.load(Ordering::SeqCst)
    }

    /// Tasks currently running (zero or one).
    pub fn active_count(&self) -> u64 {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Scans that finished with a verdict.
    pub fn completed_count(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Scans that finished with an error.
    pub fn failed_count(&self) -> u64 {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Returns true if nothing is queued or running.
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0 && self.active_count() == 0
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<QueuedTask>,
    session: Arc<ScanSession>,
    counters: Arc<Counters>,
) {
    while let Some(task) = rx.recv().await {
        counters.pending.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        // The deadline starts when the task leaves the queue.
        let deadline = session.deadline();
        let started = Instant::now();

        match task.job {
            Job::Scan {
                target,
                status,
                reply,
            } => {
                set_status(&status, ScanStatus::InProgress);
                audit::emit_scan_started(&task.id, target.key(), task.enqueued_at.elapsed());

                let outcome = session.scan_target(&target, deadline).await;
                match &outcome {
                    Ok(verdict) => {
                        counters.completed.fetch_add(1, Ordering::Relaxed);
                        audit::emit_scan_completed(&task.id, verdict, started.elapsed());
                        set_status(
                            &status,
                            ScanStatus::Complete {
                                verdict: Box::new(verdict.clone()),
                            },
                        );
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        audit::emit_scan_failed(&task.id, target.key(), e, started.elapsed());
                        set_status(
                            &status,
                            ScanStatus::Failed {
                                error: e.to_string(),
                            },
                        );
                    }
                }

                if reply.send(outcome).is_err() {
                    tracing::debug!(scan_id = %task.id, "Scan caller went away before the result");
                }
            }
            Job::Info { reply } => {
                let outcome = session.query_info(deadline).await;
                if let Err(e) = &outcome {
                    tracing::warn!(error = %e, "Engine info query failed");
                }
                if reply.send(outcome).is_err() {
                    tracing::debug!(task_id = %task.id, "Info caller went away before the result");
                }
            }
        }

        counters.active.fetch_sub(1, Ordering::SeqCst);
    }

    tracing::debug!("Scan queue worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::Aggregator;
    use crate::backends::{MockEngine, ScriptedReply};
    use crate::connection::{ConnectionManager, ReconnectPolicy};
    use crate::core::ClientConfig;
    use std::time::Duration;

    fn queue(engine: &MockEngine, timeout: Duration) -> ScanQueue {
        let config = ClientConfig::new()
            .with_request_timeout(timeout)
            .with_reconnect(ReconnectPolicy::no_retry());
        let aggregator = Arc::new(Aggregator::new());
        let connections = Arc::new(ConnectionManager::new(
            Arc::new(engine.clone()),
            config,
            aggregator.clone(),
        ));
        let session = Arc::new(ScanSession::new(connections, aggregator, timeout));
        ScanQueue::start(session).0
    }

    #[tokio::test]
    async fn test_handle_reports_completion() {
        let engine = MockEngine::new();
        let queue = queue(&engine, Duration::from_secs(2));

        let handle = queue
            .submit(ScanTarget::from_canonical("/tmp/a", "/tmp/a").unwrap())
            .unwrap();
        assert!(!handle.id.is_empty());

        let verdict = handle.wait().await.unwrap();
        assert!(verdict.is_safe());
        assert_eq!(queue.completed_count(), 1);
        assert!(queue.is_idle());
    }

    #[tokio::test]
    async fn test_tasks_run_one_at_a_time_in_order() {
        let engine = MockEngine::new()
            .with_default_reply(ScriptedReply::clean().with_delay(Duration::from_millis(20)));
        let queue = queue(&engine, Duration::from_secs(2));

        let handles: Vec<ScanHandle> = (0..4)
            .map(|i| {
                let path = format!("/tmp/file-{}", i);
                queue
                    .submit(ScanTarget::from_canonical(&path, &path).unwrap())
                    .unwrap()
            })
            .collect();

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.wait().await.unwrap().path().to_string());
        }

        assert_eq!(
            paths,
            vec!["/tmp/file-0", "/tmp/file-1", "/tmp/file-2", "/tmp/file-3"]
        );
        assert_eq!(
            engine.commands(),
            vec![
                "SCAN /tmp/file-0",
                "SCAN /tmp/file-1",
                "SCAN /tmp/file-2",
                "SCAN /tmp/file-3"
            ]
        );
        assert_eq!(engine.max_outstanding(), 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_block_queue() {
        let engine = MockEngine::new()
            .with_reply("/tmp/bad", ScriptedReply::engine_error(451, "Engine Error"));
        let queue = queue(&engine, Duration::from_secs(2));

        let bad = queue
            .submit(ScanTarget::from_canonical("/tmp/bad", "/tmp/bad").unwrap())
            .unwrap();
        let good = queue
            .submit(ScanTarget::from_canonical("/tmp/good", "/tmp/good").unwrap())
            .unwrap();

        assert!(bad.wait().await.is_err());
        assert!(good.wait().await.is_ok());
        assert_eq!(queue.failed_count(), 1);
        assert_eq!(queue.completed_count(), 1);
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let engine = MockEngine::new()
            .with_reply("/tmp/slow", ScriptedReply::clean().with_delay(Duration::from_millis(100)));
        let queue = queue(&engine, Duration::from_secs(2));

        let first = queue
            .submit(ScanTarget::from_canonical("/tmp/slow", "/tmp/slow").unwrap())
            .unwrap();
        let second = queue
            .submit(ScanTarget::from_canonical("/tmp/next", "/tmp/next").unwrap())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(first.is_in_progress());
        assert!(second.is_pending());
        assert_eq!(queue.pending_count(), 1);
        assert_eq!(queue.active_count(), 1);

        first.wait().await.unwrap();
        second.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_info_goes_through_queue() {
        let engine = MockEngine::new();
        let queue = queue(&engine, Duration::from_secs(2));

        let scan = queue
            .submit(ScanTarget::from_canonical("/tmp/a", "/tmp/a").unwrap())
            .unwrap();
        let version = queue.submit_info().await.unwrap();

        assert_eq!(version, "24011004");
        assert!(scan.is_complete());
        assert_eq!(engine.commands(), vec!["SCAN /tmp/a", "VPS"]);
    }

    #[tokio::test]
    async fn test_abandoned_info_query_does_not_stall_queue() {
        let engine = MockEngine::new().with_reply(
            "/tmp/slow",
            ScriptedReply::clean().with_delay(Duration::from_millis(50)),
        );
        let queue = queue(&engine, Duration::from_secs(2));

        let slow = queue
            .submit(ScanTarget::from_canonical("/tmp/slow", "/tmp/slow").unwrap())
            .unwrap();
        let info = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit_info().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        info.abort();

        let next = queue
            .submit(ScanTarget::from_canonical("/tmp/next", "/tmp/next").unwrap())
            .unwrap();
        slow.wait().await.unwrap();
        assert!(next.wait().await.unwrap().is_safe());
        assert_eq!(engine.commands(), vec!["SCAN /tmp/slow", "VPS", "SCAN /tmp/next"]);
    }
}
