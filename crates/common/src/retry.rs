//! Bounded exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Retry schedule shared by the consumer framework and the saga coordinator.
///
/// Attempts are numbered from 1. The delay before attempt `n + 1` is
/// `base_delay * 2^(n - 1)`, capped at `max_delay`. With jitter enabled the
/// delay is drawn uniformly from the upper half of that window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Whether to randomize delays.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Creates a jittered exponential policy.
    pub fn exponential(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: true,
        }
    }

    /// A policy that retries immediately. Useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Returns true if another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Returns the delay to wait after the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let window = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);

        if !self.jitter || window.is_zero() {
            return window;
        }

        let half = window / 2;
        let spread = window - half;
        let extra = rand::thread_rng().gen_range(0..=spread.as_millis() as u64);
        half + Duration::from_millis(extra)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, Duration::from_millis(100), Duration::from_secs(10))
    }
}
