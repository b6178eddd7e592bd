//! Circuit breaker (C2). Grounded on the teacher's root `circuit_breaker.rs` (single
//! half-open probe), in preference to `circuit_breaker/mod.rs`'s multi-trial variant,
//! per the decision recorded in DESIGN.md.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

struct Inner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

/// Mutex-guarded breaker. Admits at most one probe request while `HalfOpen`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

#[derive(Debug, thiserror::Error)]
#[error("circuit breaker open (failure_count={failure_count})")]
pub struct CircuitOpenError {
    pub failure_count: u32,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                half_open_probe_in_flight: false,
            }),
        }
    }

    /// Call before attempting the guarded operation. `Ok(())` means proceed;
    /// `Err` means fail fast without calling the underlying operation.
    pub async fn allow_request(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => {
                if inner.half_open_probe_in_flight {
                    Err(CircuitOpenError { failure_count: inner.failure_count })
                } else {
                    inner.half_open_probe_in_flight = true;
                    Ok(())
                }
            }
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_probe_in_flight = true;
                    tracing::info!("circuit breaker entering half-open");
                    Ok(())
                } else {
                    Err(CircuitOpenError { failure_count: inner.failure_count })
                }
            }
        }
    }

    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closing after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.half_open_probe_in_flight = false;
    }

    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.half_open_probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                tracing::warn!("circuit breaker re-opening after failed probe");
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    tracing::warn!(failure_count = inner.failure_count, "circuit breaker opening");
                }
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn failure_count(&self) -> u32 {
        self.inner.lock().await.failure_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig { failure_threshold: 3, recovery_timeout: Duration::from_millis(20) }
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(config());
        for _ in 0..3 {
            cb.allow_request().await.unwrap();
            cb.record_failure().await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        assert!(cb.allow_request().await.is_err());
    }

    #[tokio::test]
    async fn half_open_admits_single_probe() {
        let cb = CircuitBreaker::new(config());
        for _ in 0..3 {
            cb.allow_request().await.ok();
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        cb.allow_request().await.unwrap();
        assert_eq!(cb.state().await, CircuitState::HalfOpen);
        assert!(cb.allow_request().await.is_err());
    }

    #[tokio::test]
    async fn successful_probe_closes_circuit() {
        let cb = CircuitBreaker::new(config());
        for _ in 0..3 {
            cb.allow_request().await.ok();
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        cb.allow_request().await.unwrap();
        cb.record_success().await;
        assert_eq!(cb.state().await, CircuitState::Closed);
        assert_eq!(cb.failure_count().await, 0);
    }

    #[tokio::test]
    async fn failed_probe_reopens_circuit() {
        let cb = CircuitBreaker::new(config());
        for _ in 0..3 {
            cb.allow_request().await.ok();
            cb.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
        cb.allow_request().await.unwrap();
        cb.record_failure().await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
