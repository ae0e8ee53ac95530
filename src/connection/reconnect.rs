//! Backoff between connection attempts.

use crate::core::config::duration_ms;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a single `connect()` retries a refused or timed-out attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Total attempts per `connect()`, including the first.
    pub max_attempts: u32,

    /// Delay before the second attempt.
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,

    /// Upper bound on any delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,

    /// Spread delays so several clients don't reconnect in lockstep.
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Creates a policy with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the total number of attempts (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Sets the delay before the second attempt.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier (clamped to at least 1.0).
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay to wait before attempt `attempt` (0-indexed; the first is immediate).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let delay = if self.jitter {
            // deterministic, in [0.5, 1.0)
            let factor = 0.5 + (attempt as f64 * 0.618_033_988_749_895) % 0.5;
            capped * factor
        } else {
            capped
        };

        Duration::from_millis(delay as u64)
    }

    /// Returns whether attempt number `attempt` (0-indexed) is allowed.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}
