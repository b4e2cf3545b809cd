//! Sliding-window rate limiter over the shared cache
//!
//! Tracks request timestamps per client identity and recomputes the window on
//! every check instead of resetting at fixed boundaries, so bursts clustered
//! just after a bucket reset cannot slip through. The window lives in the
//! shared cache, making the limit fleet-wide rather than per-process.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::cache::{Cache, CacheError};

/// Fleet-wide sliding-window request limiter
#[derive(Clone)]
pub struct RateLimiter {
    cache: Cache,
}

impl RateLimiter {
    /// Create a limiter over the shared cache
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Admit or reject a request for `client`
    ///
    /// Reads the client's window, drops timestamps older than `window`, and
    /// rejects without recording when the remaining count has reached
    /// `max_requests`. Admitted requests append the current instant and
    /// persist the window with TTL equal to the window length.
    pub async fn admit(
        &self,
        client: &str,
        max_requests: usize,
        window: Duration,
    ) -> Result<bool, CacheError> {
        let key = Self::window_key(client);
        let now = Utc::now();
        let horizon = now
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(0));

        let mut timestamps: Vec<DateTime<Utc>> =
            self.cache.get(&key).await?.unwrap_or_default();

        timestamps.retain(|ts| *ts > horizon);

        if timestamps.len() >= max_requests {
            tracing::debug!(
                client = %client,
                requests = timestamps.len(),
                max = max_requests,
                "Rate limit window full"
            );
            return Ok(false);
        }

        timestamps.push(now);
        self.cache.set(&key, &timestamps, Some(window)).await?;

        Ok(true)
    }

    /// Cache key for a client's window; identities are hashed so raw
    /// addresses never appear as cache keys
    fn window_key(client: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(client.as_bytes());
        format!("rate:{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use std::sync::Arc;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Cache::new(Arc::new(MemoryBackend::new()), "test"))
    }

    #[test]
    fn test_window_key_stable_and_distinct() {
        let a1 = RateLimiter::window_key("203.0.113.7");
        let a2 = RateLimiter::window_key("203.0.113.7");
        let b = RateLimiter::window_key("203.0.113.8");

        assert_eq!(a1, a2);
        assert_ne!(a1, b);
        assert!(a1.starts_with("rate:"));
    }

    #[tokio::test]
    async fn test_admits_up_to_max() {
        let limiter = limiter();
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            assert!(limiter.admit("client", 5, window).await.unwrap());
        }
        assert!(!limiter.admit("client", 5, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejection_does_not_consume_slot() {
        let limiter = limiter();
        let window = Duration::from_secs(60);

        assert!(limiter.admit("client", 1, window).await.unwrap());

        // Repeated rejections must not extend the window by recording.
        for _ in 0..3 {
            assert!(!limiter.admit("client", 1, window).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = limiter();
        let window = Duration::from_secs(60);

        assert!(limiter.admit("a", 1, window).await.unwrap());
        assert!(!limiter.admit("a", 1, window).await.unwrap());
        assert!(limiter.admit("b", 1, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_slides() {
        let limiter = limiter();
        let window = Duration::from_millis(50);

        assert!(limiter.admit("client", 1, window).await.unwrap());
        assert!(!limiter.admit("client", 1, window).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(limiter.admit("client", 1, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_admitted_never_exceeds_max() {
        // Property from the contract: within one window, admitted count per
        // client never exceeds max_requests regardless of call pattern.
        let limiter = limiter();
        let window = Duration::from_secs(60);
        let max = 7usize;

        let mut admitted = 0;
        for _ in 0..50 {
            if limiter.admit("client", max, window).await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, max);
    }
}
