//! Backoff policy
//!
//! A pure function of the attempt count: `min(initial * multiplier^n, max)`.

use super::config::ReconnectConfig;
use std::time::Duration;

/// Computes retry delays and decides when retrying is over
///
/// Holds no mutable state; the attempt count is owned by the connection.
///
/// # Examples
///
/// ```
/// use msglink::{BackoffPolicy, ReconnectConfig};
/// use std::time::Duration;
///
/// let policy = BackoffPolicy::new(&ReconnectConfig::with_delays(
///     Duration::from_millis(100),
///     Duration::from_millis(500),
/// ));
/// assert_eq!(policy.delay_for(0), Duration::from_millis(100));
/// assert_eq!(policy.delay_for(1), Duration::from_millis(200));
/// assert_eq!(policy.delay_for(3), Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    max_attempts: Option<u32>,
}

impl BackoffPolicy {
    /// Build a policy from a reconnect configuration
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            multiplier: config.delay_multiplier,
            max_attempts: config.max_attempts,
        }
    }

    /// Delay before the retry that follows `attempt_count` failed retries
    ///
    /// Saturates at `max_delay`; never overflows.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let exp = i32::try_from(attempt_count).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.powi(exp);
        let cap = self.max_delay.as_nanos() as f64;

        if !nanos.is_finite() || nanos >= cap {
            return self.max_delay;
        }
        Duration::from_nanos(nanos as u64)
            .max(self.initial_delay)
            .min(self.max_delay)
    }

    /// Whether a failure after `attempt_count` retries ends the session
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempt_count >= max)
    }

    /// Configured retry limit
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}
