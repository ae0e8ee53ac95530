//! Request scheduling over the shared engine connection.
//!
//! The [`ScanQueue`] owns ordering and the one-at-a-time guarantee; each
//! task it runs is carried out by a [`ScanSession`], which sends one
//! command and waits for the correlated outcome.

mod queue;
mod session;

pub use queue::{ScanHandle, ScanQueue, ScanStatus};
pub use session::ScanSession;
