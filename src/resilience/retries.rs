//! Retry policy for transaction submission.
//!
//! # Design Decisions
//! - Transport failures before a hash is obtained are retried up to `max_attempts`
//! - A hash, once obtained, is only ever re-polled, never resubmitted
//! - Receipt polling backs off from `initial_backoff` to `max_backoff`

use std::time::Duration;

use crate::config::schema::SubmitterConfig;
use crate::resilience::backoff::calculate_backoff;

/// Bounds for one submission: transport attempts and confirmation wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum transport-level attempts to obtain a transaction hash.
    pub max_attempts: u32,
    /// First delay between attempts and between receipt polls.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Maximum time to wait for a final receipt.
    pub max_wait: Duration,
}

impl RetryPolicy {
    /// Delay before the `attempt`-th retry or poll (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.initial_backoff.as_millis() as u64,
            self.max_backoff.as_millis() as u64,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl From<&SubmitterConfig> for RetryPolicy {
    fn from(config: &SubmitterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            max_wait: Duration::from_secs(config.max_wait_secs),
        }
    }
}
