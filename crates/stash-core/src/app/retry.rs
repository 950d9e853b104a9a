//! Retry policy for idempotent store reads.

use std::time::Duration;

use rand::Rng;

/// Bounded retry with exponential backoff.
///
/// Only idempotent reads go through this; deletes are issued once.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound of the random delay added to each backoff.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Two attempts, short backoff. Store reads sit on the request path.
    pub fn default_reads() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: Duration::from_millis(25),
        }
    }

    /// Single attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: Duration::ZERO,
        }
    }

    /// Delay before the next attempt, given attempts already made (1-indexed).
    ///
    /// delay = base_delay * multiplier^(attempts - 1) + U(0, jitter)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        Duration::from_secs_f64(delay_secs) + jitter
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_reads()
    }
}
