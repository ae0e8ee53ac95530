//! # Scanline
//!
//! An async client for antivirus daemons that speak a line-oriented
//! protocol over a local socket.
//!
//! ## Overview
//!
//! The engine accepts `SCAN <path>` and `VPS` commands and streams back one
//! tab-separated line per scanned file or archive member. Scanline turns
//! that stream into one structured [`ScanVerdict`] per request:
//!
//! - Splits and classifies response lines, tolerating arbitrary chunking
//! - Correlates lines to requests by root path, folding archive members in
//! - Runs requests strictly one at a time over a single shared connection
//! - Reconnects transparently after idle timeouts or engine restarts
//! - Queries the engine version over the socket or via its CLI program
//! - Emits structured audit events for scans and connection changes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scanline::{ClientConfig, ScanClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ScanClient::new(ClientConfig::default())?;
//!
//!     let verdict = client.scan_file("/tmp/upload.zip").await?;
//!     if verdict.is_safe() {
//!         println!("clean");
//!     } else {
//!         println!("{}", verdict.to_json());
//!     }
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `default` - Includes `process-info`
//! - `process-info` - [`info::ProcessInfoSource`], which runs `scan -v` / `scan -V`
//!
//! ## Architecture
//!
//! - **Core**: Verdict and info types, errors, configuration, scan targets
//! - **Protocol**: Line splitting and record classification
//! - **Aggregator**: Per-path accumulation of records into verdicts
//! - **Backends**: Unix, TCP and in-memory transports
//! - **Connection**: The single connection's lifecycle and receive loop
//! - **Manager**: The FIFO request queue and per-request sessions
//! - **Info**: Engine version strategies
//! - **Audit**: Structured audit events

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod aggregator;
pub mod audit;
pub mod backends;
pub mod client;
pub mod connection;
pub mod core;
pub mod info;
pub mod manager;
pub mod protocol;

// Re-export commonly used types at the crate root
pub use crate::client::{ScanClient, ScanClientBuilder};
pub use crate::connection::{ConnectionMetrics, ConnectionState, ReconnectPolicy};
pub use crate::core::{
    ClientConfig, EngineInfo, InfoSource, ScanError, ScanResult, ScanTarget, ScanVerdict,
    SocketAddress,
};
pub use crate::manager::{ScanHandle, ScanStatus};

/// Prelude module for convenient imports.
///
/// ```rust
/// use scanline::prelude::*;
/// ```
pub mod prelude {
    pub use crate::client::{ScanClient, ScanClientBuilder};
    pub use crate::connection::{ConnectionState, ReconnectPolicy};
    pub use crate::core::{
        ClientConfig, EngineInfo, InfoSource, ScanError, ScanResult, ScanTarget, ScanVerdict,
        SocketAddress,
    };
    pub use crate::manager::{ScanHandle, ScanStatus};
}
