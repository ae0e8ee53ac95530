//! Core traits for the scanline library.
//!
//! This module defines the `InfoSource` trait: the seam behind which the
//! two ways of learning the engine's version are interchangeable.

use crate::core::error::ScanError;
use crate::core::types::EngineInfo;

use async_trait::async_trait;
use std::fmt::Debug;

/// A strategy for querying the engine's version information.
///
/// Deployments either ask the daemon itself (the `VPS` command over the
/// scan socket) or invoke the engine's command-line program. Both are
/// exposed through this trait so a client can be configured with either.
///
/// # Implementation Notes
///
/// - Implementations must be `Send + Sync` for use in async contexts.
/// - Implementations must bound their own running time and report
///   `ScanError::Timeout` rather than hang.
///
/// # Example Implementation
///
/// ```rust,ignore
/// use scanline::core::{EngineInfo, InfoSource, ScanError};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct FixedInfo;
///
/// #[async_trait]
/// impl InfoSource for FixedInfo {
///     fn name(&self) -> &str {
///         "fixed"
///     }
///
///     async fn query(&self) -> Result<EngineInfo, ScanError> {
///         Ok(EngineInfo::new("4.0.0", "24011004"))
///     }
/// }
/// ```
#[async_trait]
pub trait InfoSource: Send + Sync + Debug {
    /// Returns a short, stable name for this strategy (e.g. "socket", "process").
    fn name(&self) -> &str;

    /// Queries the engine's version information.
    ///
    /// # Errors
    ///
    /// - `ConnectionFailed` - The engine could not be reached.
    /// - `Timeout` - No answer arrived in time.
    /// - `Engine` - The engine rejected the query.
    /// - `ProcessFailed` - The external program could not be run.
    async fn query(&self) -> Result<EngineInfo, ScanError>;
}

/// An arc-wrapped info source for shared ownership.
pub type ArcInfoSource = std::sync::Arc<dyn InfoSource>;
