//! Decision model: what the dispatcher does after a failed send.

use std::time::Duration;

use super::errors::{ErrorKind, GatewayError};
use super::retry::RetryPolicy;

/// The next action to take for a task whose send failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Retry the send after a delay.
    Retry { delay: Duration, reason: String },

    /// Give up on this dispatch cycle.
    MarkFailed { reason: String },
}

/// Deciders are pure functions: given the attempts made, the delay scheduled
/// after the previous failure and the last error, they return the next action
/// without side effects.
pub trait Decider: Send + Sync {
    /// `attempts` counts the failed attempt being decided on (1-indexed).
    /// `previous_delay` is the delay chosen for the prior retry of this cycle.
    fn decide(
        &self,
        attempts: u32,
        previous_delay: Option<Duration>,
        error: &GatewayError,
    ) -> Decision;
}

/// Attempt-based retry with exponential backoff:
/// - permanent errors fail immediately
/// - transient errors retry while `attempts < max_attempts`
/// - a rate limit stretches the delay to at least what the gateway asked for
/// - a delay is never shorter than the one before it in the same cycle
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Default for DefaultDecider {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Decider for DefaultDecider {
    fn decide(
        &self,
        attempts: u32,
        previous_delay: Option<Duration>,
        error: &GatewayError,
    ) -> Decision {
        if error.kind() != ErrorKind::Transient {
            return Decision::MarkFailed {
                reason: format!("permanent failure: {error}"),
            };
        }

        let max_attempts = self.retry_policy.max_attempts;
        if attempts >= max_attempts {
            return Decision::MarkFailed {
                reason: format!("max attempts reached {attempts}/{max_attempts}: {error}"),
            };
        }

        let backoff = self.retry_policy.next_delay(attempts);
        let delay = [previous_delay, error.retry_after()]
            .into_iter()
            .flatten()
            .fold(backoff, Duration::max);
        Decision::Retry {
            delay,
            reason: format!(
                "retry attempt {}/{} after {:?}: {error}",
                attempts + 1,
                max_attempts,
                delay
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decider(max_attempts: u32) -> DefaultDecider {
        DefaultDecider::new(RetryPolicy::fixed(
            Duration::from_millis(100),
            Duration::from_secs(5),
            max_attempts,
        ))
    }

    #[test]
    fn transient_errors_retry_until_ceiling() {
        let decider = decider(3);
        let err = GatewayError::Network("connection reset".into());

        assert!(matches!(decider.decide(1, None, &err), Decision::Retry { .. }));
        assert!(matches!(decider.decide(2, None, &err), Decision::Retry { .. }));
        assert!(matches!(decider.decide(3, None, &err), Decision::MarkFailed { .. }));
    }

    #[test]
    fn permanent_errors_fail_on_first_attempt() {
        let decider = decider(3);
        let err = GatewayError::InvalidRecipient("bot was blocked by the user".into());
        match decider.decide(1, None, &err) {
            Decision::MarkFailed { reason } => assert!(reason.contains("permanent")),
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn rate_limit_sets_a_floor_on_the_delay() {
        let decider = decider(3);
        let err = GatewayError::RateLimited {
            retry_after: Duration::from_secs(3),
        };
        assert_eq!(
            decider.decide(1, None, &err),
            Decision::Retry {
                delay: Duration::from_secs(3),
                reason: format!("retry attempt 2/3 after {:?}: {err}", Duration::from_secs(3)),
            }
        );
    }

    #[test]
    fn backoff_grows_between_retries() {
        let decider = decider(5);
        let err = GatewayError::Timeout(Duration::from_secs(10));
        let delay = |n| match decider.decide(n, None, &err) {
            Decision::Retry { delay, .. } => delay,
            other => panic!("unexpected decision: {other:?}"),
        };
        assert_eq!(delay(1), Duration::from_millis(100));
        assert_eq!(delay(2), Duration::from_millis(200));
        assert_eq!(delay(3), Duration::from_millis(400));
    }

    #[test]
    fn delay_after_a_rate_limit_does_not_shrink() {
        let decider = DefaultDecider::new(RetryPolicy::fixed(
            Duration::from_secs(2),
            Duration::from_secs(60),
            5,
        ));
        let limited = GatewayError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        let first = match decider.decide(1, None, &limited) {
            Decision::Retry { delay, .. } => delay,
            other => panic!("unexpected decision: {other:?}"),
        };
        assert_eq!(first, Duration::from_secs(30));

        let network = GatewayError::Network("connection reset".into());
        let second = match decider.decide(2, Some(first), &network) {
            Decision::Retry { delay, .. } => delay,
            other => panic!("unexpected decision: {other:?}"),
        };
        assert!(second >= first, "delay decreased: {first:?} -> {second:?}");
    }
}
