//! Core types used throughout the scanline library.
//!
//! This module defines the structured verdict returned for a scanned
//! target and the engine version information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The structured result of scanning one target.
///
/// A verdict aggregates every line the engine emitted for a root path,
/// including one line per archive member. It is immutable once built;
/// `is_safe` is derived at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanVerdict {
    path: String,
    is_infected: bool,
    is_excluded: bool,
    is_password_protected: bool,
    permission_denied: bool,
    is_safe: bool,
    malware_names: Vec<String>,
    history: Vec<String>,
}

impl ScanVerdict {
    /// Creates a verdict from its aggregated flags.
    pub fn new(
        path: impl Into<String>,
        flags: VerdictFlags,
        malware_names: Vec<String>,
        history: Vec<String>,
    ) -> Self {
        let is_safe =
            !flags.is_infected && !flags.is_password_protected && !flags.permission_denied;
        Self {
            path: path.into(),
            is_infected: flags.is_infected,
            is_excluded: flags.is_excluded,
            is_password_protected: flags.is_password_protected,
            permission_denied: flags.permission_denied,
            is_safe,
            malware_names,
            history,
        }
    }

    /// Root path this verdict was aggregated for.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns `true` if at least one member was reported as a detection.
    pub fn is_infected(&self) -> bool {
        self.is_infected
    }

    /// Returns `true` if the engine excluded (part of) the target.
    pub fn is_excluded(&self) -> bool {
        self.is_excluded
    }

    /// Returns `true` if an archive member could not be opened due to a password.
    pub fn is_password_protected(&self) -> bool {
        self.is_password_protected
    }

    /// Returns `true` if the engine could not read (part of) the target.
    pub fn permission_denied(&self) -> bool {
        self.permission_denied
    }

    /// Returns `true` if nothing was detected and everything could be inspected.
    pub fn is_safe(&self) -> bool {
        self.is_safe
    }

    /// Detected malware names, one per detected member, in detection order.
    pub fn malware_names(&self) -> &[String] {
        &self.malware_names
    }

    /// Raw response lines the engine emitted for this target, in emission order.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Serializes the verdict as a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl fmt::Display for ScanVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infected {
            write!(f, "{}: infected ({})", self.path, self.malware_names.join(", "))
        } else if self.is_password_protected {
            write!(f, "{}: password protected", self.path)
        } else if self.permission_denied {
            write!(f, "{}: permission denied", self.path)
        } else if self.is_excluded {
            write!(f, "{}: excluded", self.path)
        } else {
            write!(f, "{}: clean", self.path)
        }
    }
}

/// Boolean flags accumulated while aggregating a verdict.
///
/// Flags are additive: once set by a response line they are never cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerdictFlags {
    /// A detection line was seen.
    pub is_infected: bool,
    /// An exclusion line without a more specific reason was seen.
    pub is_excluded: bool,
    /// A password-protected archive line was seen.
    pub is_password_protected: bool,
    /// A permission-denied line was seen.
    pub permission_denied: bool,
}

/// Version information reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineInfo {
    /// Engine (program) version.
    pub version: String,

    /// Virus definitions (VPS) version.
    pub virus_definitions_version: String,

    /// When this information was obtained.
    pub queried_at: DateTime<Utc>,
}

impl EngineInfo {
    /// Creates engine info stamped with the current time.
    pub fn new(version: impl Into<String>, virus_definitions_version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            virus_definitions_version: virus_definitions_version.into(),
            queried_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_is_safe_derivation() {
        let clean = ScanVerdict::new("/tmp/a", VerdictFlags::default(), vec![], vec![]);
        assert!(clean.is_safe());

        let excluded = ScanVerdict::new(
            "/tmp/a",
            VerdictFlags {
                is_excluded: true,
                ..VerdictFlags::default()
            },
            vec![],
            vec![],
        );
        assert!(excluded.is_safe());

        let locked = ScanVerdict::new(
            "/tmp/a.zip",
            VerdictFlags {
                is_password_protected: true,
                ..VerdictFlags::default()
            },
            vec![],
            vec![],
        );
        assert!(!locked.is_safe());
        assert!(!locked.is_infected());

        let denied = ScanVerdict::new(
            "/tmp/a",
            VerdictFlags {
                permission_denied: true,
                ..VerdictFlags::default()
            },
            vec![],
            vec![],
        );
        assert!(!denied.is_safe());
    }

    #[test]
    fn test_verdict_json_contains_derived_flag() {
        let verdict = ScanVerdict::new(
            "/tmp/a.zip",
            VerdictFlags {
                is_infected: true,
                ..VerdictFlags::default()
            },
            vec!["Win32:EvilTrojan".to_string()],
            vec!["SCAN /tmp/a.zip|>evil.exe\tFOUND\tWin32:EvilTrojan".to_string()],
        );

        let json = verdict.to_json();
        assert_eq!(json["is_infected"], true);
        assert_eq!(json["is_safe"], false);
        assert_eq!(json["malware_names"][0], "Win32:EvilTrojan");
    }

    #[test]
    fn test_verdict_display() {
        let verdict = ScanVerdict::new(
            "/tmp/a.zip",
            VerdictFlags {
                is_infected: true,
                ..VerdictFlags::default()
            },
            vec!["A".to_string(), "B".to_string()],
            vec![],
        );
        assert_eq!(verdict.to_string(), "/tmp/a.zip: infected (A, B)");
    }
}
