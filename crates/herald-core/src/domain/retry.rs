//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Retry policy for dispatch attempts.
///
/// delay(n) = min(base_delay * multiplier^(n-1) * (1 + jitter_ratio * sample), max_delay)
///
/// With `multiplier >= 1 + jitter_ratio` the lowest possible delay of attempt
/// `n + 1` is never below the highest possible delay of attempt `n`, so the
/// sequence is non-decreasing whatever the jitter samples are.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Fraction of the un-capped delay added as random jitter, in `[0, multiplier - 1]`.
    pub jitter_ratio: f64,

    /// Attempts allowed per dispatch cycle, including the first send.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_ratio: 0.5,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Policy without jitter; handy where timings must be predictable.
    pub fn fixed(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter_ratio: 0.0,
            max_attempts,
        }
    }

    /// Does this policy keep its monotonic and finite guarantees?
    pub fn is_valid(&self) -> bool {
        self.max_attempts > 0
            && self.multiplier >= 1.0
            && (0.0..=self.multiplier - 1.0).contains(&self.jitter_ratio)
            && self.base_delay <= self.max_delay
    }

    /// Delay before the next attempt, after `attempts` attempts (1-indexed) failed.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        self.delay_with_jitter(attempts, rand::random::<f64>())
    }

    /// Same as `next_delay` with an explicit jitter sample in `[0, 1)`.
    pub fn delay_with_jitter(&self, attempts: u32, sample: f64) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let jitter = 1.0 + self.jitter_ratio * sample.clamp(0.0, 1.0);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent) * jitter;

        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_valid() {
        let policy = RetryPolicy::default();
        assert!(policy.is_valid());
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn exponential_backoff_without_jitter() {
        let policy = RetryPolicy::fixed(Duration::from_secs(2), Duration::from_secs(60), 5);

        assert_eq!(policy.next_delay(1), Duration::from_secs(2));
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
        assert_eq!(policy.next_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::fixed(Duration::from_secs(2), Duration::from_secs(10), 50);
        assert_eq!(policy.next_delay(4), Duration::from_secs(10));
        assert_eq!(policy.next_delay(40), Duration::from_secs(10));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn jitter_never_breaks_monotonicity() {
        let policy = RetryPolicy {
            jitter_ratio: 1.0,
            ..RetryPolicy::default()
        };
        for attempts in 1..12 {
            // worst case: highest jitter now, lowest jitter next time
            let now = policy.delay_with_jitter(attempts, 1.0);
            let next = policy.delay_with_jitter(attempts + 1, 0.0);
            assert!(next >= now, "attempt {attempts}: {next:?} < {now:?}");
        }
    }

    #[test]
    fn random_delays_are_non_decreasing() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (1..10).map(|n| policy.next_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn rejects_jitter_above_multiplier_headroom() {
        let policy = RetryPolicy {
            jitter_ratio: 1.5,
            ..RetryPolicy::default()
        };
        assert!(!policy.is_valid());
    }
}
