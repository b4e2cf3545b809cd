//! Shared cache layer backing every coordination primitive
//!
//! All fleet-wide state (execution lock, rate windows, run state, stats,
//! cached site list, stored token) lives in a TTL-based key/value store that
//! every coordinator process can reach. This module provides:
//! - [`CacheBackend`]: the storage trait (get/set/delete with per-key TTL,
//!   plus an atomic set-if-absent used by the execution lock)
//! - [`RedisBackend`]: pooled Redis implementation for multi-process fleets
//! - [`MemoryBackend`]: in-process implementation for tests and
//!   single-instance deployments
//! - [`Cache`]: typed, prefix-namespaced front over a backend
//!
//! # Example
//!
//! ```rust,ignore
//! use fleetcron::cache::{Cache, MemoryBackend};
//!
//! let cache = Cache::new(Arc::new(MemoryBackend::new()), "fleetcron");
//! cache.set("lock", &lock_info, Some(Duration::from_secs(300))).await?;
//! let held: Option<LockInfo> = cache.get("lock").await?;
//! ```

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend (connection/command) failure
    #[error("cache backend error: {0}")]
    Backend(String),

    /// Value serialization failure
    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Storage trait for the shared cache
///
/// Keys are full (already prefixed) strings; values are opaque bytes.
/// A `ttl` of `None` means the key does not expire.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Read a key; absent and expired keys both return `None`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Write a key, replacing any existing value
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Write a key only if it is absent (or expired); returns whether the
    /// write won. This is the atomic claim primitive used by the execution
    /// lock.
    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError>;

    /// Delete a key; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete all keys starting with `prefix`; returns how many were removed
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Check backend reachability
    async fn ping(&self) -> Result<(), CacheError>;
}

// ============================================================================
// Redis backend
// ============================================================================

/// Redis-backed shared cache for multi-process fleets
pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    /// Connect a pooled Redis backend and verify it responds to PING
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self, CacheError> {
        let pool_config = PoolConfig::from_url(url);
        let pool = pool_config
            .builder()
            .map_err(|e| CacheError::Backend(format!("failed to create pool builder: {e}")))?
            .max_size(pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| CacheError::Backend(format!("failed to create Redis pool: {e}")))?;

        let backend = Self { pool };
        backend.ping().await?;

        tracing::info!(url = %url, "Connected to Redis");
        Ok(backend)
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Backend(format!("failed to get connection: {e}")))
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        match ttl {
            Some(ttl) => conn
                .set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?,
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| CacheError::Backend(e.to_string()))?,
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;

        // SET NX [EX] replies OK when the claim won, nil otherwise.
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }

        let reply: Option<String> = cmd
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn
            .del(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn().await?;

        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(format!("{prefix}*"))
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        if keys.is_empty() {
            return Ok(0);
        }

        let count = keys.len() as u64;
        let _: () = conn
            .del(keys)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        tracing::info!(prefix = %prefix, count = count, "Purged cache entries");
        Ok(count)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(CacheError::Backend(format!("unexpected PING reply: {reply}")))
        }
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-process cache backend with the same TTL semantics as Redis
///
/// Suitable for tests and single-instance deployments. Expired entries are
/// treated as absent and evicted lazily on access.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: evict under the write lock.
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), CacheError> {
        let entry = MemoryEntry {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(key) {
            if !existing.is_expired() {
                return Ok(false);
            }
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        match entries.remove(key) {
            Some(entry) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

// ============================================================================
// Typed cache front
// ============================================================================

/// Prefix-namespaced, JSON-codec cache handle shared across components
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    prefix: String,
}

impl Cache {
    /// Wrap a backend with a key prefix (e.g. `"fleetcron"`)
    pub fn new(backend: Arc<dyn CacheBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    /// Build the full backend key for a logical key
    pub fn key(&self, name: &str) -> String {
        format!("{}:{}", self.prefix, name)
    }

    /// Read and decode a value
    pub async fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, CacheError> {
        match self.backend.get(&self.key(name)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and write a value
    pub async fn set<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.set(&self.key(name), bytes, ttl).await
    }

    /// Encode and write a value only if the key is absent; returns whether
    /// the write won
    pub async fn set_if_absent<T: Serialize>(
        &self,
        name: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<bool, CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.set_if_absent(&self.key(name), bytes, ttl).await
    }

    /// Delete a key; returns whether it existed
    pub async fn delete(&self, name: &str) -> Result<bool, CacheError> {
        self.backend.delete(&self.key(name)).await
    }

    /// Delete every key under this cache's prefix
    ///
    /// Used by uninstall/cleanup to clear the lock, rate windows, run state,
    /// stats, the cached site list and the stored token in one sweep.
    pub async fn purge(&self) -> Result<u64, CacheError> {
        self.backend.delete_prefix(&format!("{}:", self.prefix)).await
    }

    /// Check backend reachability
    pub async fn ping(&self) -> Result<(), CacheError> {
        self.backend.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u64,
    }

    fn memory_cache() -> Cache {
        Cache::new(Arc::new(MemoryBackend::new()), "test")
    }

    #[test]
    fn test_key_prefixing() {
        let cache = memory_cache();
        assert_eq!(cache.key("lock"), "test:lock");
    }

    #[tokio::test]
    async fn test_set_and_get_roundtrip() {
        let cache = memory_cache();
        let value = Sample {
            name: "alpha".to_string(),
            count: 3,
        };

        cache.set("sample", &value, None).await.unwrap();
        let loaded: Option<Sample> = cache.get("sample").await.unwrap();

        assert_eq!(loaded, Some(value));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let cache = memory_cache();
        let loaded: Option<Sample> = cache.get("absent").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let cache = memory_cache();
        cache
            .set("short", &1u64, Some(Duration::from_millis(20)))
            .await
            .unwrap();

        let live: Option<u64> = cache.get("short").await.unwrap();
        assert_eq!(live, Some(1));

        tokio::time::sleep(Duration::from_millis(40)).await;

        let expired: Option<u64> = cache.get("short").await.unwrap();
        assert!(expired.is_none());
    }

    #[tokio::test]
    async fn test_set_if_absent_claims_once() {
        let cache = memory_cache();

        let first = cache.set_if_absent("claim", &"a", None).await.unwrap();
        let second = cache.set_if_absent("claim", &"b", None).await.unwrap();

        assert!(first);
        assert!(!second);

        let value: Option<String> = cache.get("claim").await.unwrap();
        assert_eq!(value.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_if_absent_succeeds_after_expiry() {
        let cache = memory_cache();

        assert!(cache
            .set_if_absent("claim", &"a", Some(Duration::from_millis(20)))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert!(cache
            .set_if_absent("claim", &"b", Some(Duration::from_millis(20)))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let cache = memory_cache();
        cache.set("gone", &1u64, None).await.unwrap();

        assert!(cache.delete("gone").await.unwrap());
        assert!(!cache.delete("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_clears_only_own_prefix() {
        let backend = Arc::new(MemoryBackend::new());
        let ours = Cache::new(backend.clone(), "app");
        let theirs = Cache::new(backend, "other");

        ours.set("a", &1u64, None).await.unwrap();
        ours.set("b", &2u64, None).await.unwrap();
        theirs.set("c", &3u64, None).await.unwrap();

        let removed = ours.purge().await.unwrap();
        assert_eq!(removed, 2);

        let kept: Option<u64> = theirs.get("c").await.unwrap();
        assert_eq!(kept, Some(3));
    }

    // Integration tests require running Redis
    #[tokio::test]
    #[ignore = "Requires running Redis"]
    async fn test_redis_backend_roundtrip() {
        let backend = RedisBackend::connect("redis://localhost:6379", 4)
            .await
            .unwrap();
        let cache = Cache::new(Arc::new(backend), "fleetcron-test");

        cache.set("k", &42u64, Some(Duration::from_secs(5))).await.unwrap();
        let v: Option<u64> = cache.get("k").await.unwrap();
        assert_eq!(v, Some(42));

        cache.purge().await.unwrap();
    }
}
