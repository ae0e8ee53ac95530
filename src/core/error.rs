//! Error types for the scanline library.
//!
//! This module provides structured, typed errors for all failure scenarios.
//! The library never panics; all errors are returned as `Result` values.

use std::time::Duration;
use thiserror::Error;

/// The main error type for scan and engine-info operations.
///
/// All error variants include context about what failed and why,
/// enabling proper error handling and debugging.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The scan target does not exist on the local filesystem.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was not found.
        path: String,
    },

    /// The target exists but cannot be expressed as a single protocol line.
    #[error("invalid scan target {path:?}: {reason}")]
    InvalidTarget {
        /// Path that was rejected.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// A ready connection to the engine could not be established, or was lost.
    #[error("connection to engine at '{address}' failed: {message}")]
    ConnectionFailed {
        /// Address of the engine socket.
        address: String,
        /// Error message describing the failure.
        message: String,
    },

    /// The engine reported a fault code for the request.
    #[error("engine error {code}: {message}")]
    Engine {
        /// Numeric status code reported by the engine.
        code: u16,
        /// Message following the status code.
        message: String,
        /// Root path the error was attributed to, if any.
        path: Option<String>,
    },

    /// No terminal record arrived before the deadline.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// What was being waited for (e.g. `scan /tmp/a.zip`).
        operation: String,
        /// How long the operation ran before timing out.
        elapsed: Duration,
    },

    /// The external info-query program could not be run or failed.
    #[error("process '{program}' failed: {reason}")]
    ProcessFailed {
        /// Program that was invoked.
        program: String,
        /// Reason for the failure.
        reason: String,
    },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl ScanError {
    /// Returns `true` if the same request may succeed when issued again.
    ///
    /// The core never retries on its own; this is a hint for callers.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ConnectionFailed { .. })
    }

    /// Returns `true` if this error tore down (or never produced) a connection.
    pub fn indicates_connection_loss(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. })
    }

    /// Returns the root path this error is associated with, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::FileNotFound { path } | Self::InvalidTarget { path, .. } => Some(path),
            Self::Engine { path, .. } => path.as_deref(),
            _ => None,
        }
    }

    /// Creates a `FileNotFound` error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates an `InvalidTarget` error.
    pub fn invalid_target(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConnectionFailed` error.
    pub fn connection_failed(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Creates an `Engine` error.
    pub fn engine(code: u16, message: impl Into<String>, path: Option<String>) -> Self {
        Self::Engine {
            code,
            message: message.into(),
            path,
        }
    }

    /// Creates a `Timeout` error.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Creates a `ProcessFailed` error.
    pub fn process_failed(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessFailed {
            program: program.into(),
            reason: reason.into(),
        }
    }

    /// Creates an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for scanline operations.
pub type ScanResult<T> = Result<T, ScanError>;
