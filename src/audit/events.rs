//! Audit event types and emission functions.

use crate::core::{ScanError, ScanVerdict};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Log target all audit events are emitted on.
pub const AUDIT_TARGET: &str = "scanline::audit";

/// Base trait for audit events.
pub trait AuditEvent: Serialize {
    /// Returns the event type name.
    fn event_type(&self) -> &'static str;

    /// Returns the timestamp of the event.
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Audit record for a finished scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanAuditEvent {
    /// Event type.
    pub event_type: String,

    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Queue-assigned scan ID.
    pub scan_id: String,

    /// Root path that was scanned.
    pub path: String,

    /// `clean`, `excluded`, `unscannable`, `infected` or `error`.
    pub outcome: String,

    /// Detected malware names, in arrival order.
    pub malware_names: Vec<String>,

    /// Time from dispatch to outcome, in milliseconds.
    pub duration_ms: u64,

    /// Error description when the scan failed.
    pub error: Option<String>,
}

impl ScanAuditEvent {
    /// Builds the record for a successful scan.
    pub fn from_verdict(scan_id: &str, verdict: &ScanVerdict, duration: Duration) -> Self {
        Self {
            event_type: "scan_completed".to_string(),
            timestamp: Utc::now(),
            scan_id: scan_id.to_string(),
            path: verdict.path().to_string(),
            outcome: outcome_of(verdict).to_string(),
            malware_names: verdict.malware_names().to_vec(),
            duration_ms: duration.as_millis() as u64,
            error: None,
        }
    }

    /// Builds the record for a failed scan.
    pub fn from_error(scan_id: &str, path: &str, error: &ScanError, duration: Duration) -> Self {
        Self {
            event_type: "scan_failed".to_string(),
            timestamp: Utc::now(),
            scan_id: scan_id.to_string(),
            path: path.to_string(),
            outcome: "error".to_string(),
            malware_names: Vec::new(),
            duration_ms: duration.as_millis() as u64,
            error: Some(error.to_string()),
        }
    }
}

impl AuditEvent for ScanAuditEvent {
    fn event_type(&self) -> &'static str {
        if self.error.is_some() {
            "scan_failed"
        } else {
            "scan_completed"
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Audit record for a connection lifecycle change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionAuditEvent {
    /// Event type.
    pub event_type: String,

    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Engine address.
    pub address: String,

    /// State entered.
    pub state: String,

    /// Why the state changed.
    pub reason: Option<String>,
}

impl ConnectionAuditEvent {
    /// Builds the record for a connection entering `state`.
    pub fn new(address: &str, state: &str, reason: Option<&str>) -> Self {
        Self {
            event_type: "connection_changed".to_string(),
            timestamp: Utc::now(),
            address: address.to_string(),
            state: state.to_string(),
            reason: reason.map(str::to_string),
        }
    }
}

impl AuditEvent for ConnectionAuditEvent {
    fn event_type(&self) -> &'static str {
        "connection_changed"
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

fn outcome_of(verdict: &ScanVerdict) -> &'static str {
    if verdict.is_infected() {
        "infected"
    } else if !verdict.is_safe() {
        "unscannable"
    } else if verdict.is_excluded() {
        "excluded"
    } else {
        "clean"
    }
}

/// Emits an audit event for a scan leaving the queue.
pub fn emit_scan_started(scan_id: &str, path: &str, queued_for: Duration) {
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = "scan_started",
        scan_id = %scan_id,
        path = %path,
        queued_ms = queued_for.as_millis() as u64,
        "Scan started"
    );
}

/// Emits an audit event for a completed scan.
pub fn emit_scan_completed(scan_id: &str, verdict: &ScanVerdict, duration: Duration) {
    let event = ScanAuditEvent::from_verdict(scan_id, verdict, duration);
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = event.event_type(),
        timestamp = %event.timestamp(),
        scan_id = %event.scan_id,
        path = %event.path,
        outcome = %event.outcome,
        malware_names = ?event.malware_names,
        is_password_protected = verdict.is_password_protected(),
        permission_denied = verdict.permission_denied(),
        duration_ms = event.duration_ms,
        "Scan completed"
    );
}

/// Emits an audit event for a failed scan.
pub fn emit_scan_failed(scan_id: &str, path: &str, error: &ScanError, duration: Duration) {
    let event = ScanAuditEvent::from_error(scan_id, path, error, duration);
    tracing::warn!(
        target: AUDIT_TARGET,
        event_type = event.event_type(),
        timestamp = %event.timestamp(),
        scan_id = %event.scan_id,
        path = %event.path,
        outcome = %event.outcome,
        error = ?event.error,
        recoverable = error.is_recoverable(),
        duration_ms = event.duration_ms,
        "Scan failed"
    );
}

/// Emits an audit event for a connection state change.
pub fn emit_connection_changed(address: &str, state: &str, reason: Option<&str>) {
    let event = ConnectionAuditEvent::new(address, state, reason);
    tracing::info!(
        target: AUDIT_TARGET,
        event_type = event.event_type(),
        timestamp = %event.timestamp(),
        address = %event.address,
        state = %event.state,
        reason = ?event.reason,
        "Connection state changed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VerdictFlags;

    #[test]
    fn test_scan_event_from_verdict() {
        let verdict = ScanVerdict::new(
            "/tmp/a.zip",
            VerdictFlags {
                is_infected: true,
                ..VerdictFlags::default()
            },
            vec!["Win32:EvilTrojan".to_string()],
            vec!["SCAN /tmp/a.zip|>x\t[L]0.0\tWin32:EvilTrojan".to_string()],
        );
        let event = ScanAuditEvent::from_verdict("id-1", &verdict, Duration::from_millis(12));

        assert_eq!(event.event_type(), "scan_completed");
        assert_eq!(event.outcome, "infected");
        assert_eq!(event.duration_ms, 12);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["malware_names"][0], "Win32:EvilTrojan");
    }

    #[test]
    fn test_scan_event_from_error() {
        let error = ScanError::engine(451, "Engine Error", Some("/tmp/x".to_string()));
        let event = ScanAuditEvent::from_error("id-2", "/tmp/x", &error, Duration::ZERO);

        assert_eq!(event.event_type(), "scan_failed");
        assert_eq!(event.outcome, "error");
        assert!(event.error.unwrap().contains("451"));
    }

    #[test]
    fn test_connection_event() {
        let event = ConnectionAuditEvent::new("unix:/tmp/scan.sock", "disconnected", Some("idle timeout"));

        assert_eq!(event.event_type(), "connection_changed");
        assert_eq!(event.reason.as_deref(), Some("idle timeout"));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["state"], "disconnected");
        assert_eq!(json["address"], "unix:/tmp/scan.sock");
    }

    #[test]
    fn test_emit_functions_accept_all_outcomes() {
        let verdict = ScanVerdict::new("/tmp/clean.txt", VerdictFlags::default(), Vec::new(), Vec::new());
        emit_scan_completed("id-3", &verdict, Duration::from_millis(1));
        emit_scan_failed("id-4", "/tmp/x", &ScanError::not_found("/tmp/x"), Duration::ZERO);
        emit_connection_changed("unix:/tmp/scan.sock", "ready", None);
    }
}
