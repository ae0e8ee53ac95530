//! The path-keyed result store shared by the receive loop and waiting sessions.

use crate::aggregator::pending::PendingScan;
use crate::core::{ScanError, ScanVerdict};
use crate::protocol::{EngineFault, Record};

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

/// The request currently in flight on the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Active {
    Scan(String),
    Info,
}

#[derive(Debug, Default)]
struct Inner {
    pending: HashMap<String, PendingScan>,
    active: Option<Active>,
    engine_version: Option<String>,
    version_generation: u64,
    info_fault: Option<EngineFault>,
    records_applied: u64,
    closed_generation: u64,
}

impl Inner {
    fn is_scanning(&self, root_path: &str) -> bool {
        matches!(&self.active, Some(Active::Scan(key)) if key == root_path)
    }
}

/// Accumulates classified records into per-path verdicts.
///
/// The receive loop is the only producer; each session only reads and
/// clears its own key. Every state change wakes waiters through
/// [`Aggregator::changed`], so sessions never have to spin.
///
/// # Examples
///
/// ```rust
/// use scanline::aggregator::Aggregator;
/// use scanline::protocol::LineParser;
///
/// let aggregator = Aggregator::new();
/// aggregator.begin_scan("/tmp/a.zip");
///
/// let mut parser = LineParser::new();
/// for record in parser.feed(b"SCAN /tmp/a.zip|>evil.exe\tFOUND\tWin32:EvilTrojan\r\n200 SCAN OK\r\n") {
///     aggregator.record(record);
/// }
///
/// let verdict = aggregator.poll_scan("/tmp/a.zip").unwrap().unwrap();
/// assert!(verdict.is_infected());
/// assert_eq!(verdict.malware_names(), &["Win32:EvilTrojan"]);
/// ```
#[derive(Debug, Default)]
pub struct Aggregator {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Aggregator {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a future that resolves on the next state change.
    ///
    /// Create (and enable) it before checking state to avoid missing a wakeup.
    pub fn changed(&self) -> Notified<'_> {
        self.notify.notified()
    }

    /// Applies one classified record.
    pub fn record(&self, record: Record) {
        {
            let mut inner = self.lock();
            inner.records_applied += 1;

            match record {
                Record::Scan(line) => {
                    if !inner.is_scanning(&line.root_path) {
                        tracing::debug!(
                            path = %line.root_path,
                            "Discarding result line for a path not in flight"
                        );
                        return;
                    }
                    inner
                        .pending
                        .entry(line.root_path.clone())
                        .or_insert_with(|| PendingScan::new(line.root_path.clone()))
                        .apply(&line);
                }

                Record::ScanComplete => {
                    let key = match &inner.active {
                        Some(Active::Scan(key)) => key.clone(),
                        _ => {
                            tracing::debug!("Completion with no scan in flight, ignoring");
                            return;
                        }
                    };
                    let completed = inner
                        .pending
                        .get_mut(&key)
                        .map(PendingScan::complete)
                        .unwrap_or(false);
                    if !completed {
                        tracing::debug!(
                            path = %key,
                            "Completion before any result line, treating as stale"
                        );
                    }
                }

                Record::EngineError(fault) => {
                    let target = fault.path.clone().or_else(|| match &inner.active {
                        Some(Active::Scan(key)) => Some(key.clone()),
                        _ => None,
                    });
                    match (target, inner.active.clone()) {
                        (Some(key), _) if !inner.is_scanning(&key) => {
                            tracing::debug!(
                                path = %key,
                                code = fault.code,
                                "Discarding engine error for a path not in flight"
                            );
                        }
                        (Some(key), _) => {
                            tracing::warn!(
                                path = %key,
                                code = fault.code,
                                message = %fault.message,
                                "Engine reported an error for scan"
                            );
                            inner
                                .pending
                                .entry(key.clone())
                                .or_insert_with(|| PendingScan::new(key))
                                .fail(fault);
                        }
                        (None, Some(Active::Info)) => {
                            tracing::warn!(
                                code = fault.code,
                                message = %fault.message,
                                "Engine reported an error for info query"
                            );
                            inner.info_fault = Some(fault);
                        }
                        (None, _) => {
                            tracing::warn!(
                                code = fault.code,
                                line = %fault.raw,
                                "Unattributed engine error"
                            );
                        }
                    }
                }

                Record::VersionInfo { version } => {
                    inner.engine_version = Some(version);
                    inner.version_generation += 1;
                }
            }
        }

        self.notify.notify_waiters();
    }

    /// Returns the verdict accumulated so far for `root_path`, if any line arrived.
    pub fn get_result(&self, root_path: &str) -> Option<ScanVerdict> {
        self.lock()
            .pending
            .get(root_path)
            .filter(|pending| pending.has_result())
            .map(PendingScan::verdict)
    }

    /// Marks `root_path` as the scan in flight, purging any stale entries.
    ///
    /// Only one scan is in flight at a time, so every entry left over from
    /// an earlier request is dropped, whatever its key.
    pub fn begin_scan(&self, root_path: &str) {
        let mut inner = self.lock();
        for (path, stale) in inner.pending.drain() {
            tracing::debug!(
                path = %path,
                stale_lines = stale.lines_seen(),
                "Purged stale result before scan"
            );
        }
        inner.active = Some(Active::Scan(root_path.to_string()));
    }

    /// Takes the outcome for `root_path` if the scan has settled.
    ///
    /// A settled entry is removed, so each outcome is returned once.
    pub fn poll_scan(&self, root_path: &str) -> Option<Result<ScanVerdict, ScanError>> {
        let mut inner = self.lock();
        let settled = inner
            .pending
            .get(root_path)
            .map(PendingScan::is_settled)
            .unwrap_or(false);
        if !settled {
            return None;
        }
        let pending = inner.pending.remove(root_path)?;
        clear_active(&mut inner, &Active::Scan(root_path.to_string()));
        Some(pending.into_outcome())
    }

    /// Ends the scan of `root_path` at its deadline.
    ///
    /// Returns the partial verdict if at least one result line arrived, and
    /// `None` otherwise. The entry is removed either way.
    pub fn finish_scan(&self, root_path: &str) -> Option<Result<ScanVerdict, ScanError>> {
        let mut inner = self.lock();
        clear_active(&mut inner, &Active::Scan(root_path.to_string()));
        let pending = inner.pending.remove(root_path)?;
        if pending.is_settled() || pending.has_result() {
            Some(pending.into_outcome())
        } else {
            None
        }
    }

    /// Marks an info query as in flight; returns the current version generation.
    pub fn begin_info(&self) -> u64 {
        let mut inner = self.lock();
        inner.active = Some(Active::Info);
        inner.info_fault = None;
        inner.version_generation
    }

    /// Returns the version reported after `since_generation`, or the engine error.
    pub fn poll_info(&self, since_generation: u64) -> Option<Result<String, ScanError>> {
        let mut inner = self.lock();
        if let Some(fault) = inner.info_fault.take() {
            clear_active(&mut inner, &Active::Info);
            return Some(Err(ScanError::engine(fault.code, fault.message, None)));
        }
        if inner.version_generation > since_generation {
            let version = inner.engine_version.clone().unwrap_or_default();
            clear_active(&mut inner, &Active::Info);
            return Some(Ok(version));
        }
        None
    }

    /// Ends an info query without a result.
    pub fn finish_info(&self) {
        let mut inner = self.lock();
        clear_active(&mut inner, &Active::Info);
        inner.info_fault = None;
    }

    /// Signals that every record from connection `generation` has been applied
    /// and no more will follow.
    pub fn connection_closed(&self, generation: u64) {
        {
            let mut inner = self.lock();
            inner.closed_generation = inner.closed_generation.max(generation);
        }
        self.notify.notify_waiters();
    }

    /// Returns `true` once connection `generation` has been drained and closed.
    pub fn is_connection_closed(&self, generation: u64) -> bool {
        self.lock().closed_generation >= generation
    }

    /// The most recent virus definitions version seen on any connection.
    pub fn engine_version(&self) -> Option<String> {
        self.lock().engine_version.clone()
    }

    /// Number of entries currently held; at most the scan in flight.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Total records applied since creation.
    pub fn records_applied(&self) -> u64 {
        self.lock().records_applied
    }
}

fn clear_active(inner: &mut Inner, expected: &Active) {
    if inner.active.as_ref() == Some(expected) {
        inner.active = None;
    }
}
