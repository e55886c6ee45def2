// Fixed-window rate limiting keyed by client address
// Counters live in a shared store so every instance enforces the same limit.

pub mod middleware;
pub mod store;

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::auth::error::AuthError;
use crate::config::RateLimitConfig;

pub use middleware::rate_limit;
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, WindowState};

/// Outcome of an admitted request, used for the X-RateLimit-* headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

impl RateLimitStatus {
    /// Unix timestamp (seconds) at which the current window closes
    pub fn reset_at(&self) -> u64 {
        reset_at(self.reset_after)
    }
}

pub(crate) fn reset_at(after: Duration) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now + after).as_secs()
}

/// Whole seconds a client should wait, never zero
fn retry_after_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    pub fn limit(&self) -> u64 {
        self.config.max_requests
    }

    /// Store key for a client address
    pub fn key_for(client: &str) -> String {
        format!("rate_limit:{}", client)
    }

    /// Count a request from `client`, rejecting it once the window is full
    ///
    /// The read and the increment are separate round trips, so concurrent
    /// requests can be admitted slightly past the limit. The increment itself
    /// is atomic and never loses a count.
    pub async fn check(&self, client: &str) -> Result<RateLimitStatus, AuthError> {
        let key = Self::key_for(client);
        let limit = self.config.max_requests;

        if let Some(window) = self.store.current(&key).await? {
            if window.count >= limit {
                warn!("Rate limit exceeded for client {}", client);
                return Err(AuthError::RateLimited {
                    retry_after_secs: retry_after_secs(window.ttl),
                });
            }
        }

        let window = self.store.increment(&key, self.config.window).await?;
        Ok(RateLimitStatus {
            limit,
            remaining: limit.saturating_sub(window.count),
            reset_after: window.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u64, window: Duration) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryCounterStore::new()),
            RateLimitConfig {
                max_requests,
                window,
            },
        )
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_request_past_limit_is_rejected() {
        let limiter = limiter(3, Duration::from_secs(60));

        for expected_remaining in [2, 1, 0] {
            let status = limiter.check("10.0.0.1").await.unwrap();
            assert_eq!(status.limit, 3);
            assert_eq!(status.remaining, expected_remaining);
        }

        match limiter.check("10.0.0.1").await {
            Err(AuthError::RateLimited { retry_after_secs }) => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60)
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_clients_are_counted_separately() {
        let limiter = limiter(1, Duration::from_secs(60));
        assert!(limiter.check("10.0.0.1").await.is_ok());
        assert!(limiter.check("10.0.0.2").await.is_ok());
        assert!(limiter.check("10.0.0.1").await.is_err());
    }

    #[tokio::test]
    async fn test_first_request_after_window_resets_count() {
        let limiter = limiter(2, Duration::from_millis(100));
        limiter.check("client").await.unwrap();
        limiter.check("client").await.unwrap();
        assert!(limiter.check("client").await.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = limiter.check("client").await.unwrap();
        assert_eq!(status.remaining, 1, "count restarts at one");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_never_lose_counts() {
        let store = Arc::new(MemoryCounterStore::new());
        let limiter = RateLimiter::new(
            store.clone(),
            RateLimitConfig {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
        );

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.check("burst").await.is_ok() }));
        }

        let mut admitted = 0u64;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }

        // Fixed-window limiting may over-admit under a race, but every admitted
        // request is counted and at least the limit always gets through.
        assert!(admitted >= 10);
        let window = store
            .current(&RateLimiter::key_for("burst"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(window.count, admitted);
    }
}
