//! Attempt limits and linear backoff for webhook delivery.

use std::time::Duration;

/// Default number of delivery attempts per payload.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default backoff unit. Attempt `i` (0-based) is followed by a pause of
/// `2i + 1` units.
pub const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Default per-attempt timeout.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// How many times to try a delivery and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per payload. Zero is treated as one.
    pub max_attempts: u32,
    /// Base unit of the pause after a failed attempt.
    pub backoff_unit: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Pause after the failed attempt at 0-based `attempt`: 1, 3, 5, ...
    /// backoff units.
    #[must_use]
    pub const fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(attempt.saturating_mul(2).saturating_add(1))
    }

    /// Attempt count, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}
