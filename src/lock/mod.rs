//! Network-wide execution lock with lease expiry and re-entry throttling
//!
//! At most one coordinator run may be active across the fleet. The lock is a
//! shared-cache entry claimed with the backend's atomic set-if-absent, so two
//! concurrent acquirers cannot both win; the lease TTL is the hard upper
//! bound on staleness if a holder crashes without releasing.
//!
//! A separate last-run marker refuses re-acquisition within a minimum
//! interval even when no lock is held, guarding against rapid re-entry right
//! after a previous lease expired.
//!
//! Release is unconditional (no ownership check): a delayed release from a
//! timed-out caller can drop a lock acquired by someone else. Accepted risk,
//! mitigated by keeping lease TTLs short relative to expected run duration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cache::{Cache, CacheError};

const LOCK_KEY: &str = "lock";
const LAST_RUN_KEY: &str = "last_run";

/// Lock errors (storage failures only; contention is a normal `false`)
#[derive(Error, Debug)]
pub enum LockError {
    /// Shared cache failure
    #[error("lock storage error: {0}")]
    Storage(#[from] CacheError),
}

/// The stored lock record, tagged with the holder's identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Hostname of the holding process
    pub host: String,

    /// PID of the holding process
    pub pid: u32,

    /// When the lock was claimed
    pub acquired_at: DateTime<Utc>,

    /// When the lease runs out
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Whether the lease is still live
    pub fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Fleet-wide mutual exclusion for coordinator runs
#[derive(Clone)]
pub struct ExecutionLock {
    cache: Cache,
    host: String,
}

impl ExecutionLock {
    /// Create a lock handle over the shared cache
    pub fn new(cache: Cache) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        Self { cache, host }
    }

    /// Try to acquire the lock
    ///
    /// Refuses when the last successful acquisition was less than
    /// `min_interval` ago (independent of lock validity), or when another
    /// holder's lease is live. On success the last-run marker is stamped
    /// with the same TTL as the lease.
    pub async fn acquire(
        &self,
        lease_ttl: Duration,
        min_interval: Duration,
    ) -> Result<bool, LockError> {
        let now = Utc::now();

        if !min_interval.is_zero() {
            if let Some(last_run) = self.cache.get::<DateTime<Utc>>(LAST_RUN_KEY).await? {
                let elapsed = now - last_run;
                if elapsed
                    < chrono::Duration::from_std(min_interval)
                        .unwrap_or_else(|_| chrono::Duration::zero())
                {
                    tracing::debug!(
                        last_run = %last_run,
                        "Lock refused: ran too recently"
                    );
                    return Ok(false);
                }
            }
        }

        let info = LockInfo {
            host: self.host.clone(),
            pid: std::process::id(),
            acquired_at: now,
            expires_at: now
                + chrono::Duration::from_std(lease_ttl)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        };

        // Atomic claim: the backend treats expired entries as absent, so a
        // dead holder's lease self-heals at TTL without a read-check race.
        let claimed = self
            .cache
            .set_if_absent(LOCK_KEY, &info, Some(lease_ttl))
            .await?;

        if !claimed {
            return Ok(false);
        }

        self.cache.set(LAST_RUN_KEY, &now, Some(lease_ttl)).await?;

        tracing::info!(host = %info.host, pid = info.pid, "Execution lock acquired");
        Ok(true)
    }

    /// Release the lock; returns whether a lock entry was removed
    pub async fn release(&self) -> Result<bool, LockError> {
        let released = self.cache.delete(LOCK_KEY).await?;
        if released {
            tracing::info!("Execution lock released");
        }
        Ok(released)
    }

    /// Whether a valid lock is currently held
    pub async fn is_locked(&self) -> Result<bool, LockError> {
        Ok(self.peek().await?.is_some())
    }

    /// Inspect the current holder, if a valid lock exists
    pub async fn peek(&self) -> Result<Option<LockInfo>, LockError> {
        let info: Option<LockInfo> = self.cache.get(LOCK_KEY).await?;
        Ok(info.filter(LockInfo::is_valid))
    }
}
