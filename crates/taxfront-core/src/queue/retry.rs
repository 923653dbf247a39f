//! Retry policy: decides backoff delays.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Retry policy for failed tasks.
///
/// Exponential backoff: `delay = base_delay * multiplier^(retry_count - 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 2 minutes, doubling: 2, 4, 8 minutes for retries 1-3.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(120),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry_count` (1-indexed, counted after the failure).
    ///
    /// `retry_count = 0` is treated like the first retry.
    pub fn next_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Instant at which retry number `retry_count` becomes claimable.
    pub fn retry_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        let delay = TimeDelta::from_std(self.next_delay(retry_count)).unwrap_or(TimeDelta::MAX);
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
