//! Connection lifecycle state.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Where the single engine connection currently is in its lifecycle.
///
/// Transitions: `Disconnected -> Connecting -> Ready -> Closing -> Disconnected`,
/// with `Connecting -> Disconnected` when every attempt fails.
#[derive(Debug, Clone, Default)]
pub enum ConnectionState {
    /// No connection.
    #[default]
    Disconnected,

    /// Attempting to open a connection.
    Connecting {
        /// When the first attempt started.
        since: Instant,
    },

    /// Connected and accepting commands.
    Ready {
        /// When the connection became ready.
        since: Instant,
        /// Monotonic number identifying this connection.
        generation: u64,
    },

    /// Tearing down the connection.
    Closing,
}

impl ConnectionState {
    /// Returns `true` if commands can be sent.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Returns `true` if no connection is held.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Generation of the ready connection, if any.
    pub fn generation(&self) -> Option<u64> {
        match self {
            Self::Ready { generation, .. } => Some(*generation),
            _ => None,
        }
    }

    /// Returns the name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting { .. } => "connecting",
            Self::Ready { .. } => "ready",
            Self::Closing => "closing",
        }
    }
}

/// Counters describing connection behaviour since the client was built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    /// Individual connection attempts, including retries.
    pub connect_attempts: u64,
    /// Attempts that produced a ready connection.
    pub connect_successes: u64,
    /// Attempts that were refused or timed out.
    pub connect_failures: u64,
    /// Connections lost to peer close, read errors or write errors.
    pub disconnects: u64,
    /// Connections closed because nothing was received for too long.
    pub idle_timeouts: u64,
    /// Records classified from received lines.
    pub records_received: u64,
    /// Oversized partial lines that were discarded.
    pub lines_discarded: u64,
}

impl ConnectionMetrics {
    /// Creates empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one connection attempt and its outcome.
    pub fn record_attempt(&mut self, success: bool) {
        self.connect_attempts += 1;
        if success {
            self.connect_successes += 1;
        } else {
            self.connect_failures += 1;
        }
    }

    /// Fraction of attempts that failed (0.0 to 1.0).
    pub fn failure_rate(&self) -> f64 {
        if self.connect_attempts == 0 {
            return 0.0;
        }
        self.connect_failures as f64 / self.connect_attempts as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_default() {
        let state = ConnectionState::default();
        assert!(state.is_disconnected());
        assert!(!state.is_ready());
        assert_eq!(state.generation(), None);
    }

    #[test]
    fn test_state_names() {
        let now = Instant::now();
        assert_eq!(ConnectionState::Connecting { since: now }.name(), "connecting");
        assert_eq!(
            ConnectionState::Ready {
                since: now,
                generation: 4
            }
            .generation(),
            Some(4)
        );
        assert_eq!(ConnectionState::Closing.name(), "closing");
    }

    #[test]
    fn test_metrics() {
        let mut metrics = ConnectionMetrics::new();
        assert_eq!(metrics.failure_rate(), 0.0);

        metrics.record_attempt(false);
        metrics.record_attempt(true);

        assert_eq!(metrics.connect_attempts, 2);
        assert_eq!(metrics.connect_successes, 1);
        assert!((metrics.failure_rate() - 0.5).abs() < f64::EPSILON);
    }
}
