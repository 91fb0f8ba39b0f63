//! Bounded exponential backoff with jitter.
//!
//! `with_retry` is transparent to the operation's result type. Only errors that
//! report themselves as retryable are retried; everything else is returned on
//! the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::StoreError;

/// Errors that can tell the executor whether another attempt makes sense.
pub trait Retryable {
    /// Whether the failure is transient
    fn is_retryable(&self) -> bool;
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}

/// Retry policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for the exponential part of the delay
    pub max_delay: Duration,
    /// Upper bound for the random jitter added to each delay
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
        }
    }

    /// Deterministic part of the delay after `attempt` failed (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff plus a random jitter in `[0, max_jitter)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };
        self.backoff(attempt) + jitter
    }
}

/// Final failure of a retried operation.
///
/// `error` is the last error exactly as the operation produced it.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts made before giving up
    pub attempts: u32,
    /// The last error
    pub error: E,
}

impl<E> RetryFailure<E> {
    /// Discard the attempt count
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl RetryFailure<StoreError> {
    /// Convert into a [`StoreError`] annotated with operation and attempts
    pub fn annotate(self, operation: &str) -> StoreError {
        self.error.with_operation(operation, self.attempts)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `policy.max_attempts` attempts have been made.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, RetryFailure<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                return Err(RetryFailure {
                    attempts: attempt,
                    error: e,
                })
            }
            Err(e) if attempt >= max_attempts => {
                error!(
                    operation = operation_name,
                    attempts = attempt,
                    error = %e,
                    "Max retry attempts reached"
                );
                return Err(RetryFailure {
                    attempts: attempt,
                    error: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Database operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_jitter: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            max_jitter: Duration::from_millis(5),
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay < Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn test_always_failing_operation_runs_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::immediate(3);

        let result: std::result::Result<(), _> = with_retry(&policy, "always_fails", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Transient("connection reset".to_string()))
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(failure.attempts, 3);
        assert_eq!(failure.error.kind(), ErrorKind::Transient);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::immediate(3);

        let result = with_retry(&policy, "flaky", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(StoreError::Transient(format!("attempt {n}")))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_integrity_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::immediate(5);

        let result: std::result::Result<(), _> = with_retry(&policy, "create_task", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::integrity("world_id is required"))
        })
        .await;

        let failure = result.unwrap_err();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);

        let annotated = failure.annotate("tasks.create");
        assert_eq!(annotated.kind(), ErrorKind::Integrity);
        assert!(annotated.to_string().starts_with("tasks.create failed after 1 attempt(s)"));
    }
}
