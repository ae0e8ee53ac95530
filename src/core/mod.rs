//! Core types and traits for the scanline library.
//!
//! This module provides the fundamental building blocks used throughout
//! the library:
//!
//! - [`types`] - The `ScanVerdict` and `EngineInfo` result types
//! - [`traits`] - The `InfoSource` strategy trait
//! - [`error`] - Structured error types
//! - [`target`] - Scan target normalization
//! - [`config`] - Client configuration

pub mod config;
pub mod error;
pub mod target;
pub mod traits;
pub mod types;

// Re-export commonly used types at the core level
pub use config::{ClientConfig, SocketAddress};
pub use error::{ScanError, ScanResult};
pub use target::ScanTarget;
pub use traits::{ArcInfoSource, InfoSource};
pub use types::{EngineInfo, ScanVerdict, VerdictFlags};
