//! Retry utilities for registry calls.
//!
//! Provides a retry policy with exponential backoff and optional jitter, and
//! a helper that drives an async operation until it succeeds, fails with a
//! non-retryable error, or the attempt budget runs out.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Errors that can be retried.
pub trait RetryableError {
    /// Whether this error should be retried.
    fn is_retryable(&self) -> bool;

    /// Factor applied to the backoff before the next attempt.
    ///
    /// Throttling responses return more than 1 so callers wait longer than
    /// they would after a plain server error.
    fn backoff_multiplier(&self) -> u32 {
        1
    }
}

/// Retry policy shared by every registry request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay; the wait before retry `n` is `base_delay * 2^n`.
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    /// Maximum delay between retries, before the throttling multiplier.
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Jitter factor (0.0-1.0) applied to delay.
    pub jitter: f64,
    /// Backoff multiplier for rate-limited responses.
    pub rate_limit_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
            rate_limit_multiplier: 4,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps, for tests and dry runs.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: 0.0,
            rate_limit_multiplier: 1,
        }
    }

    /// Calculate backoff delay before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base_secs = self.base_delay.as_secs_f64();
        let max_secs = self.max_delay.as_secs_f64().max(0.0);

        let multiplier = 2_u32.saturating_pow(attempt) as f64;
        let mut delay = (base_secs * multiplier).min(max_secs);

        if self.jitter > 0.0 && delay > 0.0 {
            let jitter = (fastrand::f64() * 2.0 - 1.0) * self.jitter;
            delay = (delay * (1.0 + jitter)).max(0.0);
        }

        Duration::from_secs_f64(delay)
    }

    /// Wait before retry number `attempt` after `err`, scaled by the
    /// error's backoff multiplier.
    pub fn retry_delay<E: RetryableError>(&self, attempt: u32, err: &E) -> Duration {
        self.backoff_delay(attempt)
            .saturating_mul(err.backoff_multiplier().max(1))
    }

    /// Total attempts including the first try.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run an async operation with retries on retryable errors.
///
/// Returns the last error once the budget is spent; callers can tell an
/// exhausted retryable error from a fatal one with [`RetryableError::is_retryable`].
pub async fn run_with_retry<F, Fut, T, E>(
    operation: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = policy.retry_delay(attempt, &err);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Request failed, retrying after backoff"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(operation, attempt, error = %err, "Request failed, retries exhausted");
                } else {
                    debug!(operation, attempt, error = %err, "Request failed (non-retryable)");
                }
                return Err(err);
            }
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Retryable,
        Throttled,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Retryable => write!(f, "retryable"),
                TestError::Throttled => write!(f, "throttled"),
                TestError::Fatal => write!(f, "fatal"),
            }
        }
    }

    impl RetryableError for TestError {
        fn is_retryable(&self) -> bool {
            !matches!(self, TestError::Fatal)
        }

        fn backoff_multiplier(&self) -> u32 {
            match self {
                TestError::Throttled => 3,
                _ => 1,
            }
        }
    }

    /// Runs `call` under `policy`, feeding it the 0-based attempt number.
    async fn attempts_until_done(
        policy: RetryPolicy,
        call: impl Fn(u32) -> Result<u32, TestError>,
    ) -> (u32, Result<u32, TestError>) {
        let seen = Arc::new(AtomicU32::new(0));
        let call = Arc::new(call);
        let result = run_with_retry("registry call", &policy, || {
            let seen = seen.clone();
            let call = call.clone();
            async move { call(seen.fetch_add(1, Ordering::SeqCst)) }
        })
        .await;
        (seen.load(Ordering::SeqCst), result)
    }

    #[tokio::test]
    async fn test_server_errors_retried_until_success() {
        let (calls, result) = attempts_until_done(RetryPolicy::immediate(3), |n| {
            if n < 2 { Err(TestError::Retryable) } else { Ok(7) }
        })
        .await;
        assert_eq!(calls, 3);
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let (calls, result) =
            attempts_until_done(RetryPolicy::immediate(3), |_| Err(TestError::Fatal)).await;
        assert_eq!(calls, 1);
        assert!(matches!(result, Err(TestError::Fatal)));
    }

    #[tokio::test]
    async fn test_throttling_exhausts_one_plus_max_retries() {
        let (calls, result) =
            attempts_until_done(RetryPolicy::immediate(3), |_| Err(TestError::Throttled)).await;
        assert_eq!(calls, 4);
        assert!(matches!(result, Err(TestError::Throttled)));
    }

    #[tokio::test]
    async fn test_no_retries_configured() {
        let (calls, result) =
            attempts_until_done(RetryPolicy::immediate(0), |_| Err(TestError::Retryable)).await;
        assert_eq!(calls, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_throttled_delay_scaled_by_multiplier() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_delay(1, &TestError::Retryable), Duration::from_secs(2));
        assert_eq!(policy.retry_delay(1, &TestError::Throttled), Duration::from_secs(6));
        assert_eq!(policy.retry_delay(2, &TestError::Throttled), Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_retries_wait_longer() {
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };

        let started = tokio::time::Instant::now();
        attempts_until_done(policy.clone(), |_| Err(TestError::Retryable)).await;
        assert_eq!(started.elapsed(), Duration::from_secs(2 + 4));

        let started = tokio::time::Instant::now();
        attempts_until_done(policy, |_| Err(TestError::Throttled)).await;
        assert_eq!(started.elapsed(), Duration::from_secs((2 + 4) * 3));
    }

    #[test]
    fn test_policy_default_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.rate_limit_multiplier, 4);
    }

    #[test]
    fn test_backoff_delay_exponential() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(120),
            jitter: 0.0,
            rate_limit_multiplier: 1,
        };

        // base * 2^attempt
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_delay_capped_at_max() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            rate_limit_multiplier: 1,
        };

        assert_eq!(policy.backoff_delay(1), Duration::from_secs(20));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(30));
        assert_eq!(policy.backoff_delay(6), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_delay_with_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            jitter: 0.5,
            rate_limit_multiplier: 1,
        };

        for _ in 0..20 {
            let secs = policy.backoff_delay(1).as_secs_f64();
            assert!((5.0..=15.0).contains(&secs), "{secs}s outside 10s +/- 50%");
        }
    }

    #[test]
    fn test_backoff_delay_zero_attempt_treated_as_one() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(0), policy.backoff_delay(1));
    }

    #[test]
    fn test_policy_serializes_durations_as_millis() {
        let json = serde_json::to_value(RetryPolicy::default()).unwrap();
        assert_eq!(json["base_delay"], 1000);
        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, RetryPolicy::default());
    }
}
