//! Retry policies for the transaction executor.

use crate::error::CoreError;
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Decides whether a failed attempt is retried and how long to wait.
pub trait RetryPolicy: Send + Sync + fmt::Debug {
    /// Returns the delay before the next attempt, or `None` to give up.
    ///
    /// `attempt` counts attempts made so far, so it is `1` after the first
    /// failure.
    fn next_delay(&self, failure: &CoreError, attempt: u32) -> Option<Duration>;
}

/// Bounded retry with a fixed delay between attempts.
///
/// Only conflicts are retried. With `max_attempts = n` the body runs at
/// most `n` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Creates the default policy: 20 attempts, 100 ms apart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    /// Sets the total number of attempts.
    #[must_use]
    pub const fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the pause between attempts.
    #[must_use]
    pub const fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl RetryPolicy for RetryConfig {
    fn next_delay(&self, failure: &CoreError, attempt: u32) -> Option<Duration> {
        (failure.is_conflict() && attempt < self.max_attempts).then_some(self.delay)
    }
}

/// Never retries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn next_delay(&self, _failure: &CoreError, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Conflict retry with exponentially growing, jittered delays.
///
/// The delay after attempt `k` is drawn from `[d/2, d]` where
/// `d = min(base * 2^(k-1), max)`. Jitter keeps colliding writers from
/// retrying in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay ceiling after the first failure.
    pub base: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base: Duration::from_millis(10),
            max: Duration::from_secs(1),
        }
    }
}

impl ExponentialBackoff {
    /// Creates a policy with the given bounds.
    #[must_use]
    pub const fn new(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            base,
            max,
        }
    }

    fn ceiling(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << shift).min(self.max)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, failure: &CoreError, attempt: u32) -> Option<Duration> {
        if !failure.is_conflict() || attempt >= self.max_attempts {
            return None;
        }
        let ceiling = self.ceiling(attempt);
        let ceiling_nanos = u64::try_from(ceiling.as_nanos()).unwrap_or(u64::MAX);
        if ceiling_nanos == 0 {
            return Some(Duration::ZERO);
        }
        let nanos = rand::thread_rng().gen_range(ceiling_nanos / 2..=ceiling_nanos);
        Some(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    fn conflict() -> CoreError {
        CoreError::Conflict {
            txid: TransactionId::new(1),
            conflicts: 1,
        }
    }

    #[test]
    fn default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 20);
        assert_eq!(config.delay, Duration::from_millis(100));
    }

    #[test]
    fn builder_sets_fields() {
        let config = RetryConfig::new()
            .max_attempts(3)
            .delay(Duration::from_millis(5));
        assert_eq!(config.next_delay(&conflict(), 1), Some(Duration::from_millis(5)));
        assert_eq!(config.next_delay(&conflict(), 2), Some(Duration::from_millis(5)));
        assert_eq!(config.next_delay(&conflict(), 3), None);
    }

    #[test]
    fn only_conflicts_are_retried() {
        let config = RetryConfig::default();
        assert!(config.next_delay(&CoreError::codec("x"), 1).is_none());
        assert!(config
            .next_delay(&CoreError::codec("x").into_application(), 1)
            .is_none());
        assert!(config.next_delay(&CoreError::Interrupted, 1).is_none());
    }

    #[test]
    fn no_retry_policies() {
        assert!(RetryConfig::no_retry().next_delay(&conflict(), 1).is_none());
        assert!(NoRetry.next_delay(&conflict(), 1).is_none());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = ExponentialBackoff::new(
            10,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        assert_eq!(policy.ceiling(1), Duration::from_millis(10));
        assert_eq!(policy.ceiling(2), Duration::from_millis(20));
        assert_eq!(policy.ceiling(3), Duration::from_millis(40));
        assert_eq!(policy.ceiling(4), Duration::from_millis(50));
        assert_eq!(policy.ceiling(60), Duration::from_millis(50));

        for attempt in 1..10 {
            let delay = policy.next_delay(&conflict(), attempt).unwrap();
            let ceiling = policy.ceiling(attempt);
            assert!(delay <= ceiling);
            assert!(delay >= ceiling / 2);
        }
        assert!(policy.next_delay(&conflict(), 10).is_none());
    }
}
