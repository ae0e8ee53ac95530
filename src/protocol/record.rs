//! Classified response records.

use std::fmt;

/// Separator between an archive's path and the path of a member inside it.
pub const ARCHIVE_DELIMITER: &str = "|>";

/// Marker at the start of the second field of an exclusion line.
pub const EXCLUSION_MARKER: &str = "[E]";

/// Line that ends a single scan transaction.
pub const SCAN_COMPLETE: &str = "200 SCAN OK";

/// One classified line of engine output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// The engine reported a fault (`4xx`/`5xx` status line).
    EngineError(EngineFault),

    /// Virus definitions version (`VPS <version>`).
    VersionInfo {
        /// The version string with the prefix stripped.
        version: String,
    },

    /// The current scan transaction has finished (`200 SCAN OK`).
    ScanComplete,

    /// A result line for one scanned path or archive member.
    Scan(ScanLine),
}

impl Record {
    /// Returns the correlation key this record belongs to, if it names one.
    pub fn root_path(&self) -> Option<&str> {
        match self {
            Self::Scan(line) => Some(&line.root_path),
            Self::EngineError(fault) => fault.path.as_deref(),
            _ => None,
        }
    }

    /// Returns the short name of the record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EngineError(_) => "engine_error",
            Self::VersionInfo { .. } => "version_info",
            Self::ScanComplete => "scan_complete",
            Self::Scan(_) => "scan",
        }
    }
}

/// A fault reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFault {
    /// Numeric status code.
    pub code: u16,
    /// Message following the code, up to the first tab.
    pub message: String,
    /// Root path named by a `SCAN <path>` field on the same line, if any.
    pub path: Option<String>,
    /// The line as received.
    pub raw: String,
}

/// A `SCAN` result line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLine {
    /// The line as received.
    pub raw: String,
    /// Path of the scanned file or archive member.
    pub member_path: String,
    /// Member path with any archive-member suffix stripped.
    pub root_path: String,
    /// What the line reports.
    pub status: ScanLineStatus,
}

/// What a single `SCAN` line reports about its member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanLineStatus {
    /// Scanned, nothing found.
    Clean,
    /// The engine skipped or could not fully inspect the member.
    Excluded(ExclusionReason),
    /// Malware was detected.
    Detection {
        /// Name of the detected malware, with escape characters removed.
        malware_name: String,
    },
}

/// Why a member was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExclusionReason {
    /// The archive member is password protected.
    PasswordProtected,
    /// The engine was not allowed to read the member.
    PermissionDenied,
    /// Any other exclusion.
    Other,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PasswordProtected => write!(f, "password_protected"),
            Self::PermissionDenied => write!(f, "permission_denied"),
            Self::Other => write!(f, "excluded"),
        }
    }
}

impl ScanLine {
    /// Returns `true` if this line names an archive member rather than the root file.
    pub fn is_archive_member(&self) -> bool {
        self.member_path.len() != self.root_path.len()
    }
}
