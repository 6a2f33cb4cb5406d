//! Bounded retry with pluggable backoff.
//!
//! [`RetryExecutor`] wraps any async operation. It holds no state between
//! calls, so one executor can be cloned into the session refresh path and the
//! request gateway alike.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of attempts (the first try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay unit for backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(200);

/// Default ceiling on a single backoff wait.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// How the wait grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// `base * n` after the n-th failure.
    Linear,
    /// `base * 2^n` after the n-th failure.
    #[default]
    Exponential,
}

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff: BackoffKind,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            backoff: BackoffKind::default(),
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::default().with_max_attempts(1)
    }

    /// Set the total number of attempts. Values below one are clamped to one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffKind) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Wait before the next attempt, given the 1-based number of the attempt
    /// that just failed.
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        let delay = match self.backoff {
            BackoffKind::Linear => self.base_delay.saturating_mul(n),
            BackoffKind::Exponential => {
                let factor = 1u32.checked_shl(n).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Error returned when an operation did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryFailure<E> {
    /// The error from the last attempt.
    pub error: E,
    /// How many attempts were made.
    pub attempts: u32,
    /// True when the policy ran out of attempts on a retryable error.
    pub exhausted: bool,
}

impl<E> RetryFailure<E> {
    pub fn into_inner(self) -> E {
        self.error
    }
}

impl<E: fmt::Display> fmt::Display for RetryFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exhausted {
            write!(
                f,
                "{} (retries exhausted after {} attempts)",
                self.error, self.attempts
            )
        } else {
            write!(f, "{}", self.error)
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryFailure<E> {}

/// Executes async operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    name: Cow<'static, str>,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            name: Cow::Borrowed("operation"),
        }
    }

    /// Label used in log output.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, retrying on every error.
    pub async fn run<F, Fut, T, E>(&self, op: F) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_with(op, |_| true).await
    }

    /// Run `op`, retrying only errors for which `should_retry` returns true.
    ///
    /// Waits use `tokio::time::sleep`, so other tasks keep running during backoff.
    pub async fn run_with<F, Fut, T, E, P>(
        &self,
        mut op: F,
        should_retry: P,
    ) -> Result<T, RetryFailure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !should_retry(&error) {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                    exhausted: false,
                });
            }

            if attempt >= max_attempts {
                tracing::warn!(
                    operation = %self.name,
                    attempts = attempt,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                    exhausted: true,
                });
            }

            let backoff = self.policy.delay_for(attempt);
            tracing::warn!(
                operation = %self.name,
                attempt = attempt,
                max_attempts = max_attempts,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::new()
            .with_backoff(BackoffKind::Linear)
            .with_base_delay(Duration::from_millis(100));

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let policy = RetryPolicy::new()
            .with_backoff(BackoffKind::Exponential)
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::new().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new().with_max_attempts(3));

        let counter = calls.clone();
        let result: Result<&str, RetryFailure<String>> = executor
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("boom".to_string())
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_reports_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new().with_max_attempts(4));

        let counter = calls.clone();
        let failure = executor
            .run(|| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("down".to_string())
                }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(failure.attempts, 4);
        assert!(failure.exhausted);
        assert!(failure.to_string().contains("retries exhausted"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_predicate_stops_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(RetryPolicy::new().with_max_attempts(5));

        let counter = calls.clone();
        let failure = executor
            .run_with(
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("rejected".to_string())
                    }
                },
                |e| e != "rejected",
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(failure.attempts, 1);
        assert!(!failure.exhausted);
        assert_eq!(failure.to_string(), "rejected");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_waits() {
        let executor = RetryExecutor::new(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_backoff(BackoffKind::Exponential)
                .with_base_delay(Duration::from_millis(100)),
        );

        let start = tokio::time::Instant::now();
        let _ = executor
            .run(|| async { Err::<(), _>("fail".to_string()) })
            .await;

        // 200ms after the first failure, 400ms after the second.
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_between_attempts() {
        let executor = RetryExecutor::new(
            RetryPolicy::new()
                .with_max_attempts(3)
                .with_backoff(BackoffKind::Linear)
                .with_base_delay(Duration::from_secs(1)),
        );

        let start = tokio::time::Instant::now();
        let _ = executor
            .run(|| async { Err::<(), _>("fail".to_string()) })
            .await;

        // 1s after the first failure, 2s after the second.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
