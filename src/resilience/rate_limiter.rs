//! Multi-resource rate limiter (C3). Grounded on `rate_limiter/mod.rs`'s DashMap-keyed
//! idiom, adapted from its fixed-window request counter to a continuous token-bucket
//! paced at `ResilienceConfig::rate_limit_permits_per_sec`: each named resource gets
//! its own bucket that refills at that rate and suspends callers (rather than
//! rejecting them) until a token is available.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::ResilienceConfig;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A single resource's token bucket. Capacity equals the refill rate, so the burst
/// a caller can spend without waiting is one second's worth of permits.
struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    fn new(permits_per_sec: f64) -> Self {
        let capacity = permits_per_sec.max(1.0);
        Self {
            capacity,
            refill_per_sec: permits_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    /// Suspends until one token is available, consuming it before returning.
    /// Returns whether the caller had to wait at all.
    async fn acquire(&self) -> bool {
        let mut waited = false;
        loop {
            let wait_for = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait_for {
                None => return waited,
                Some(delay) => {
                    waited = true;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Independent named admission gates (e.g. "database", "llm"). Each resource's
/// bucket refills independently; resources never contend with each other.
pub struct MultiRateLimiter {
    resources: DashMap<String, Arc<TokenBucket>>,
    permits_per_sec: f64,
}

impl MultiRateLimiter {
    pub fn new(permits_per_sec: f64) -> Self {
        Self { resources: DashMap::new(), permits_per_sec: permits_per_sec.max(f64::MIN_POSITIVE) }
    }

    /// Builds a limiter paced at `ResilienceConfig::rate_limit_permits_per_sec`.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self::new(config.rate_limit_permits_per_sec)
    }

    fn bucket_for(&self, resource: &str) -> Arc<TokenBucket> {
        self.resources
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.permits_per_sec)))
            .clone()
    }

    /// Suspends until a permit for `resource` is available, pacing callers to
    /// `permits_per_sec` for that resource.
    pub async fn acquire(&self, resource: &str) -> RateLimitPermit {
        let bucket = self.bucket_for(resource);
        if bucket.acquire().await {
            metrics::counter!("rate_limit_wait_total", "resource" => resource.to_string()).increment(1);
        }
        RateLimitPermit { _private: () }
    }
}

/// Marker returned by `acquire`. The token bucket has no concept of releasing a
/// permit early, so this carries no state; it exists for call-site symmetry with
/// other resilience primitives that do hand back an RAII guard.
pub struct RateLimitPermit {
    _private: (),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resources_are_independent() {
        let limiter = MultiRateLimiter::new(1.0);
        let _db_permit = limiter.acquire("database").await; // drains the database bucket's single-token burst
        tokio::time::timeout(Duration::from_millis(50), limiter.acquire("llm"))
            .await
            .expect("llm resource must not be paced by database resource's exhaustion");
    }

    #[tokio::test]
    async fn exhausted_bucket_paces_the_next_acquire() {
        let limiter = MultiRateLimiter::new(10.0);
        // Burst capacity is 10 tokens; draining it forces the 11th acquire to wait
        // roughly 1/10s for a single token to refill.
        for _ in 0..10 {
            limiter.acquire("database").await;
        }
        let start = Instant::now();
        limiter.acquire("database").await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn from_config_reads_permits_per_sec() {
        let resilience = ResilienceConfig {
            max_retries: 3,
            retry_delay_ms: 100,
            backoff_factor: 2.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 60,
            rate_limit_permits_per_sec: 42.0,
        };
        let limiter = MultiRateLimiter::from_config(&resilience);
        assert_eq!(limiter.permits_per_sec, 42.0);
    }
}
