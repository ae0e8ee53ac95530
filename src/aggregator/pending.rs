//! Per-target accumulation of response lines.

use crate::core::{ScanError, ScanVerdict, VerdictFlags};
use crate::protocol::{EngineFault, ExclusionReason, ScanLine, ScanLineStatus};

use std::time::Instant;

/// One in-flight (or abandoned) scan, keyed by root path.
#[derive(Debug, Clone)]
pub struct PendingScan {
    root_path: String,
    created_at: Instant,
    flags: VerdictFlags,
    malware_names: Vec<String>,
    history: Vec<String>,
    lines_seen: usize,
    completed: bool,
    fault: Option<EngineFault>,
}

impl PendingScan {
    /// Creates an empty pending scan with all verdict fields defaulted.
    pub fn new(root_path: impl Into<String>) -> Self {
        Self {
            root_path: root_path.into(),
            created_at: Instant::now(),
            flags: VerdictFlags::default(),
            malware_names: Vec::new(),
            history: Vec::new(),
            lines_seen: 0,
            completed: false,
            fault: None,
        }
    }

    /// Folds one scan line into the verdict.
    ///
    /// Flags are only ever set; malware names append in arrival order.
    pub fn apply(&mut self, line: &ScanLine) {
        self.history.push(line.raw.clone());
        self.lines_seen += 1;

        match &line.status {
            ScanLineStatus::Clean => {}
            ScanLineStatus::Excluded(ExclusionReason::PasswordProtected) => {
                self.flags.is_password_protected = true;
            }
            ScanLineStatus::Excluded(ExclusionReason::PermissionDenied) => {
                self.flags.permission_denied = true;
            }
            ScanLineStatus::Excluded(ExclusionReason::Other) => {
                self.flags.is_excluded = true;
            }
            ScanLineStatus::Detection { malware_name } => {
                self.flags.is_infected = true;
                self.malware_names.push(malware_name.clone());
            }
        }
    }

    /// Marks the scan as failed. Overrides any completion.
    pub fn fail(&mut self, fault: EngineFault) {
        self.history.push(fault.raw.clone());
        if self.fault.is_none() {
            self.fault = Some(fault);
        }
    }

    /// Marks the transaction as complete if at least one result line arrived.
    ///
    /// Returns `false` (and changes nothing) when no line has been seen.
    pub fn complete(&mut self) -> bool {
        if self.lines_seen == 0 {
            return false;
        }
        self.completed = true;
        true
    }

    /// Root path this scan is keyed by.
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// When this entry was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns `true` if at least one result line arrived.
    pub fn has_result(&self) -> bool {
        self.lines_seen > 0
    }

    /// Returns `true` once the completion sentinel arrived after a result line.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// The engine fault recorded for this scan, if any.
    pub fn fault(&self) -> Option<&EngineFault> {
        self.fault.as_ref()
    }

    /// Returns `true` if the scan has reached a state a waiter can return on.
    pub fn is_settled(&self) -> bool {
        self.fault.is_some() || self.completed
    }

    /// Number of result lines folded in so far.
    pub fn lines_seen(&self) -> usize {
        self.lines_seen
    }

    /// Builds the verdict for the lines seen so far.
    pub fn verdict(&self) -> ScanVerdict {
        ScanVerdict::new(
            self.root_path.clone(),
            self.flags,
            self.malware_names.clone(),
            self.history.clone(),
        )
    }

    /// Consumes the entry, producing the caller-facing outcome.
    pub fn into_outcome(self) -> Result<ScanVerdict, ScanError> {
        if let Some(fault) = self.fault {
            return Err(ScanError::engine(
                fault.code,
                fault.message,
                Some(self.root_path),
            ));
        }
        Ok(ScanVerdict::new(
            self.root_path,
            self.flags,
            self.malware_names,
            self.history,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{classify_line, Record};

    fn scan_line(line: &str) -> ScanLine {
        match classify_line(line) {
            Some(Record::Scan(scan)) => scan,
            other => panic!("expected scan line, got {:?}", other),
        }
    }

    #[test]
    fn test_new_pending_defaults() {
        let pending = PendingScan::new("/tmp/a");
        let verdict = pending.verdict();
        assert!(!verdict.is_infected());
        assert!(!verdict.is_excluded());
        assert!(verdict.malware_names().is_empty());
        assert!(!pending.has_result());
    }

    #[test]
    fn test_detections_accumulate_in_order() {
        let mut pending = PendingScan::new("/tmp/a.zip");
        pending.apply(&scan_line("SCAN /tmp/a.zip|>one.exe\tFOUND\tTrojan.One"));
        pending.apply(&scan_line("SCAN /tmp/a.zip|>readme.txt"));
        pending.apply(&scan_line("SCAN /tmp/a.zip|>two.exe\tFOUND\tTrojan.Two"));
        pending.apply(&scan_line("SCAN /tmp/a.zip|>three.exe\tFOUND\tTrojan.Three"));

        let verdict = pending.verdict();
        assert!(verdict.is_infected());
        assert_eq!(
            verdict.malware_names(),
            &["Trojan.One", "Trojan.Two", "Trojan.Three"]
        );
        assert_eq!(verdict.history().len(), 4);
    }

    #[test]
    fn test_flags_are_additive() {
        let mut pending = PendingScan::new("/tmp/l.zip");
        pending.apply(&scan_line(
            "SCAN /tmp/l.zip|>a\t[E]42144\tError 42144 {Archive is password protected}",
        ));
        pending.apply(&scan_line("SCAN /tmp/l.zip|>b\t[E]13.0\tError 13 {Permission denied}"));
        pending.apply(&scan_line("SCAN /tmp/l.zip|>c"));

        let verdict = pending.verdict();
        assert!(verdict.is_password_protected());
        assert!(verdict.permission_denied());
        assert!(!verdict.is_infected());
        assert!(!verdict.is_safe());
    }

    #[test]
    fn test_complete_requires_a_result() {
        let mut pending = PendingScan::new("/tmp/a");
        assert!(!pending.complete());
        assert!(!pending.is_settled());

        pending.apply(&scan_line("SCAN /tmp/a"));
        assert!(pending.complete());
        assert!(pending.is_settled());
    }

    #[test]
    fn test_fault_overrides_completion() {
        let mut pending = PendingScan::new("/tmp/x");
        pending.apply(&scan_line("SCAN /tmp/x"));
        pending.complete();

        let fault = match classify_line("451 Engine Error\tSCAN /tmp/x") {
            Some(Record::EngineError(fault)) => fault,
            other => panic!("expected engine error, got {:?}", other),
        };
        pending.fail(fault);

        match pending.into_outcome() {
            Err(ScanError::Engine { code, path, .. }) => {
                assert_eq!(code, 451);
                assert_eq!(path.as_deref(), Some("/tmp/x"));
            }
            other => panic!("expected engine error, got {:?}", other),
        }
    }
}
