//! Retry with exponential backoff for transient failures.
//!
//! The retry loop re-runs the *whole* operation closure on every attempt, so
//! any read-validate-write sequence inside it starts from fresh state. Errors
//! decide for themselves whether they are worth retrying through
//! [`Retryable`].
//!
//! ```rust
//! use std::time::Duration;
//! use common::{CancellationToken, RetryPolicy, Retryable, retry_with_policy};
//!
//! #[derive(Debug)]
//! struct Busy;
//! impl std::fmt::Display for Busy {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "busy")
//!     }
//! }
//! impl Retryable for Busy {
//!     fn is_retryable(&self) -> bool {
//!         true
//!     }
//! }
//!
//! # async fn example() -> Result<(), common::RetryError<Busy>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(10))
//!     .build();
//!
//! let value = retry_with_policy(&policy, &CancellationToken::new(), || async {
//!     Ok::<_, Busy>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::cancel::{CancelReason, CancellationToken};

/// Classifies an error as transient (retry) or terminal (propagate).
pub trait Retryable {
    /// Returns true if repeating the operation may succeed.
    fn is_retryable(&self) -> bool;
}

/// Retry policy configuration.
///
/// # Default Values
///
/// - `max_attempts`: 5 (including the first attempt)
/// - `initial_delay`: 20ms
/// - `max_delay`: 1 second
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Cap for the exponential delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Creates a new policy builder seeded with the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: RetryPolicy::default(),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Sets the total number of attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.policy.max_attempts = max_attempts;
        self
    }

    /// Sets the delay after the first failure.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between attempts.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Builds the policy.
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Outcome of a retry loop that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The error was not retryable and was returned on the first occurrence.
    #[error("{0}")]
    Permanent(E),

    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The cancellation token fired while waiting between attempts.
    #[error("retry interrupted after {attempts} attempts: {reason}")]
    Interrupted {
        reason: CancelReason,
        attempts: u32,
        last: Option<E>,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent(_) => 1,
            RetryError::Exhausted { attempts, .. } | RetryError::Interrupted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// Returns the last error produced by the operation, if any.
    pub fn into_last(self) -> Option<E> {
        match self {
            RetryError::Permanent(e) | RetryError::Exhausted { last: e, .. } => Some(e),
            RetryError::Interrupted { last, .. } => last,
        }
    }
}

/// Runs `operation` until it succeeds, fails permanently, exhausts the
/// policy, or `cancel` fires.
///
/// The token is checked before every attempt and raced against every backoff
/// sleep, so a cancelled caller unwinds within one attempt.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        if let Some(reason) = cancel.reason() {
            return Err(RetryError::Interrupted {
                reason,
                attempts: attempt,
                last: None,
            });
        }

        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_retryable() => {
                return Err(RetryError::Permanent(err));
            }
            Err(err) if attempt >= max_attempts => {
                tracing::warn!(attempt, error = %err, "retry attempts exhausted");
                metrics::counter!("retry_exhausted_total").increment(1);
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                metrics::counter!("retry_attempts_total").increment(1);

                if let Some(reason) = cancel.sleep(delay).await {
                    return Err(RetryError::Interrupted {
                        reason,
                        attempts: attempt,
                        last: Some(err),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(max_attempts)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(4))
            .build()
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .multiplier(2.0)
            .build();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_policy(&fast_policy(5), &CancellationToken::new(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> =
            retry_with_policy(&fast_policy(5), &CancellationToken::new(), || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            })
            .await;

        assert!(matches!(result, Err(RetryError::Permanent(TestError::Fatal))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempt_count() {
        let result: Result<(), _> =
            retry_with_policy(&fast_policy(3), &CancellationToken::new(), || async {
                Err(TestError::Transient)
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert!(err.to_string().contains("gave up after 3 attempts"));
        assert_eq!(err.into_last(), Some(TestError::Transient));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = retry_with_policy(&fast_policy(3), &token, || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Transient) }
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::Interrupted { attempts: 0, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let token = CancellationToken::new();
        let policy = RetryPolicy::builder()
            .max_attempts(10)
            .initial_delay(Duration::from_secs(60))
            .max_delay(Duration::from_secs(60))
            .build();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let result: Result<(), _> =
            retry_with_policy(&policy, &token, || async { Err(TestError::Transient) }).await;

        match result {
            Err(RetryError::Interrupted {
                reason,
                attempts,
                last,
            }) => {
                assert_eq!(reason, CancelReason::Cancelled);
                assert_eq!(attempts, 1);
                assert_eq!(last, Some(TestError::Transient));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
