//! # Exponential Backoff
//!
//! Provides the per-item retry delay calculation used by the change queue.
//! Delays double with each consecutive failure of the same item, starting
//! from a small base and capped at a maximum, so a flapping item backs off
//! quickly without ever being parked for longer than the cap.

use std::time::Duration;

/// Exponential backoff calculator.
///
/// Stateless: the queue tracks attempt counts per item and asks for the
/// delay matching the current count. Attempt numbering starts at 1.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Delay for the first failed attempt
    base: Duration,
    /// Upper bound for any delay
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a backoff policy with the given base and maximum delay.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retrying the given (1-indexed) failed attempt.
    ///
    /// `attempt` 1 returns the base delay, each further attempt doubles it,
    /// capped at the maximum. An attempt of 0 is treated as 1.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Shift in u128 nanoseconds; the cap keeps the result in u64 range.
        let exp = attempt.saturating_sub(1).min(63);
        let nanos = self.base.as_nanos().saturating_mul(1u128 << exp);
        if nanos >= self.max.as_nanos() {
            self.max
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}
