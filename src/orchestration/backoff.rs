//! # Retry Backoff
//!
//! Capped exponential backoff: `min(initial * multiplier^(attempt - 1), max)`.
//! `attempt` is the number of the attempt that just failed (1 for the first
//! failure). The result is never negative and never exceeds `max`.

use crate::config::RetrySettings;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Delay before retrying after the given failed attempt
pub fn backoff(attempt: u32, initial: Duration, multiplier: f64, max: Duration) -> Duration {
    if initial.is_zero() || max.is_zero() {
        return Duration::ZERO;
    }
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let nanos = initial.as_nanos() as f64 * multiplier.powi(exponent);

    if !nanos.is_finite() || nanos >= max.as_nanos() as f64 {
        return max;
    }
    if nanos <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(nanos.round() as u64).min(max)
}

/// Retry settings bound into a reusable policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            initial_delay: settings.initial_delay(),
            max_delay: settings.max_delay(),
            multiplier: settings.multiplier,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff(attempt, self.initial_delay, self.multiplier, self.max_delay)
    }

    /// Wall-clock time of the next retry after `attempt` failed at `now`
    pub fn next_retry_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(attempt))
            .unwrap_or_else(|_| chrono::Duration::milliseconds(i64::MAX / 1_000_000));
        now.checked_add_signed(delay).unwrap_or(now)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_progression() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(9), Duration::from_secs(256));
        assert_eq!(policy.delay_for(10), Duration::from_secs(300));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[test]
    fn test_attempt_zero_is_treated_as_first() {
        let delay = backoff(0, Duration::from_millis(500), 3.0, Duration::from_secs(10));
        assert_eq!(delay, Duration::from_millis(500));
    }

    #[test]
    fn test_initial_above_max_is_capped() {
        let delay = backoff(1, Duration::from_secs(30), 2.0, Duration::from_secs(10));
        assert_eq!(delay, Duration::from_secs(10));
    }

    #[test]
    fn test_next_retry_at_offsets_now() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        assert_eq!(
            policy.next_retry_at(2, now),
            now + chrono::Duration::seconds(2)
        );
    }

    proptest! {
        #[test]
        fn prop_backoff_is_bounded_and_monotonic(
            attempt in 1u32..64,
            initial_ms in 0u64..10_000,
            multiplier in 1.0f64..4.0,
            max_ms in 0u64..600_000,
        ) {
            let initial = Duration::from_millis(initial_ms);
            let max = Duration::from_millis(max_ms);
            let current = backoff(attempt, initial, multiplier, max);
            let next = backoff(attempt + 1, initial, multiplier, max);

            prop_assert!(current <= max);
            prop_assert!(next >= current);
        }

        #[test]
        fn prop_backoff_matches_formula_below_cap(attempt in 1u32..8, initial_ms in 1u64..1_000) {
            let initial = Duration::from_millis(initial_ms);
            let max = Duration::from_secs(3_600);
            let expected = initial_ms * 2u64.pow(attempt - 1);
            prop_assert_eq!(backoff(attempt, initial, 2.0, max), Duration::from_millis(expected));
        }
    }
}
