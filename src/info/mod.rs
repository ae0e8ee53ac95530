//! Strategies for learning the engine's version.
//!
//! - [`SocketInfoSource`] - asks the daemon with `VPS` over the scan socket
//! - [`ProcessInfoSource`] - runs the engine's command-line program
//!   (requires the `process-info` feature)

mod socket;

#[cfg(feature = "process-info")]
mod process;

pub use socket::SocketInfoSource;

#[cfg(feature = "process-info")]
pub use process::ProcessInfoSource;
