//! Exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Backoff schedule for downstream retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; an operation runs at most `max_retries + 1` times.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Jitter as a fraction of each delay, 0.0 for an exact schedule.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based), without jitter:
    /// `min(initial_delay * multiplier^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_nanos = (self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exponent)).round();
        if !delay_nanos.is_finite() || delay_nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(delay_nanos as u64)
    }

    /// Delay before retry `attempt` with jitter applied (0 to `jitter_ratio` of the delay).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if self.jitter_ratio <= 0.0 {
            return delay;
        }

        let jitter_range = delay.mul_f64(self.jitter_ratio.min(1.0));
        if jitter_range.is_zero() {
            return delay;
        }
        delay + rand::thread_rng().gen_range(Duration::ZERO..jitter_range)
    }
}
