//! Correlation of response records into per-path verdicts.
//!
//! Responses are keyed by the root path the engine echoes back, never by
//! arrival order, so archive members and late lines land on the right scan.

mod pending;
mod store;

pub use pending::PendingScan;
pub use store::Aggregator;
