//! Structured audit logging.
//!
//! Scan outcomes and connection changes are emitted as `tracing` events on
//! the `scanline::audit` target, so any subscriber (JSON file, OpenTelemetry,
//! etc.) can capture them separately from diagnostic logs.

mod events;

pub use events::{
    emit_connection_changed, emit_scan_completed, emit_scan_failed, emit_scan_started,
    AuditEvent, ConnectionAuditEvent, ScanAuditEvent, AUDIT_TARGET,
};
