//! The single engine connection and its lifecycle.
//!
//! - [`ConnectionManager`] - connect, reconnect, close and the receive loop
//! - [`ConnectionState`] / [`ConnectionMetrics`] - observable lifecycle
//! - [`ReconnectPolicy`] - backoff between connection attempts

mod manager;
mod reconnect;
mod state;

pub use manager::ConnectionManager;
pub use reconnect::ReconnectPolicy;
pub use state::{ConnectionMetrics, ConnectionState};
