//! Exponential-backoff retry (C1). Grounded on `middleware_helpers/retry.rs`'s
//! `RetryConfig`/`with_retry` shape and `original_source/pg-mcp/src/resilience/retry.py`'s
//! exact validation rules and delay formula.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

#[derive(Debug, Error)]
pub enum RetryConfigError {
    #[error("max_attempts must be >= 1")]
    MaxAttemptsZero,
    #[error("backoff_factor must be >= 1.0")]
    BackoffFactorTooSmall,
    #[error("max_delay must be >= initial_delay")]
    MaxDelayTooSmall,
}

impl RetryConfig {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Result<Self, RetryConfigError> {
        if max_attempts < 1 {
            return Err(RetryConfigError::MaxAttemptsZero);
        }
        if backoff_factor < 1.0 {
            return Err(RetryConfigError::BackoffFactorTooSmall);
        }
        if max_delay < initial_delay {
            return Err(RetryConfigError::MaxDelayTooSmall);
        }
        Ok(Self { max_attempts, initial_delay, backoff_factor, max_delay })
    }

    /// `min(initial_delay * backoff_factor^attempt, max_delay)`, `attempt` 0-indexed.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retry exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },
    #[error(transparent)]
    NonRetryable(#[from] NonRetryableWrapper<E>),
}

/// Wraps a non-retryable underlying error so `RetryError` can carry either outcome
/// through `?` without losing the original error type.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct NonRetryableWrapper<E: fmt::Display + fmt::Debug>(pub E);

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E
    where
        E: From<NonRetryableWrapper<E>>,
    {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::NonRetryable(NonRetryableWrapper(e)) => e,
        }
    }
}

/// Runs `op` with exponential backoff. `is_retryable` classifies each error; a
/// non-retryable error propagates immediately without consuming a retry delay.
pub async fn with_retry<T, E, Op, Fut, Retryable>(
    config: &RetryConfig,
    is_retryable: Retryable,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    Retryable: Fn(&E) -> bool,
    E: fmt::Display + fmt::Debug,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(RetryError::NonRetryable(NonRetryableWrapper(err)));
                }
                let is_last = attempt + 1 >= config.max_attempts;
                if is_last {
                    tracing::error!(attempts = config.max_attempts, error = %err, "retry exhausted");
                    return Err(RetryError::Exhausted { attempts: config.max_attempts, last_error: err });
                }
                let delay = config.calculate_delay(attempt);
                tracing::warn!(attempt = attempt + 1, max_attempts = config.max_attempts, ?delay, error = %err, "retrying after failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn rejects_zero_max_attempts() {
        assert!(RetryConfig::new(0, Duration::ZERO, 2.0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn rejects_sub_unity_backoff() {
        assert!(RetryConfig::new(3, Duration::ZERO, 0.5, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn rejects_max_delay_below_initial() {
        assert!(RetryConfig::new(3, Duration::from_secs(10), 2.0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn delay_grows_then_caps() {
        let cfg = RetryConfig::new(10, Duration::from_secs(1), 2.0, Duration::from_secs(10)).unwrap();
        assert_eq!(cfg.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(cfg.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(cfg.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(cfg.calculate_delay(3), Duration::from_secs(8));
        assert_eq!(cfg.calculate_delay(4), Duration::from_secs(10));
        assert_eq!(cfg.calculate_delay(10), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn retries_until_exhausted_with_attempt_count() {
        let cfg = RetryConfig::new(3, Duration::from_millis(1), 1.0, Duration::from_millis(1)).unwrap();
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = with_retry(&cfg, |_| true, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom")
        })
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_propagates_immediately() {
        let cfg = RetryConfig::new(5, Duration::from_millis(1), 1.0, Duration::from_millis(1)).unwrap();
        let calls = AtomicU32::new(0);
        let result: Result<(), RetryError<&str>> = with_retry(&cfg, |_| false, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("fatal")
        })
        .await;
        assert!(matches!(result, Err(RetryError::NonRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let cfg = RetryConfig::new(5, Duration::from_millis(1), 1.0, Duration::from_millis(1)).unwrap();
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryError<&str>> = with_retry(&cfg, |_| true, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err("transient") } else { Ok(n) }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    proptest::proptest! {
        /// Delay is non-decreasing across attempts and never exceeds `max_delay`,
        /// for any valid config and attempt sequence.
        #[test]
        fn delay_is_non_decreasing_and_capped(
            initial_ms in 1u64..500,
            factor in 1.0f64..5.0,
            max_ms in 500u64..60_000,
            attempts in 0u32..20,
        ) {
            let cfg = RetryConfig::new(
                attempts.max(1),
                Duration::from_millis(initial_ms),
                factor,
                Duration::from_millis(max_ms),
            ).unwrap();

            let mut previous = Duration::ZERO;
            for attempt in 0..attempts {
                let delay = cfg.calculate_delay(attempt);
                proptest::prop_assert!(delay >= previous);
                proptest::prop_assert!(delay <= cfg.max_delay);
                previous = delay;
            }
        }
    }
}
