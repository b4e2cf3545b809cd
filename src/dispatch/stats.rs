//! Cumulative and per-day run statistics
//!
//! `NetworkStats` accumulates across every finalized run; the per-day
//! counters give operators a cheap "how did today go" view without querying
//! the queue engine. Reads merge whatever subset of fields exists in storage
//! with defaults, so the schema can grow across versions without migrations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::{Cache, CacheError};

const STATS_KEY: &str = "stats";

/// Per-day counters expire after two days; the window of interest is today
const TODAY_TTL: Duration = Duration::from_secs(48 * 3600);

/// Cumulative fleet-wide run statistics
///
/// All counters are monotonically non-decreasing except
/// `units_processed_last_run`, which is overwritten at each finalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkStats {
    /// Completed runs since install
    pub total_runs: u64,

    /// When the most recent run finalized
    pub last_run_at: Option<DateTime<Utc>>,

    /// Sites processed across all runs
    pub total_sites_processed: u64,

    /// Sites processed by the most recent run
    pub sites_processed_last_run: u64,
}

/// Success/failure counts for one calendar day
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TodayStats {
    /// Site triggers that succeeded today
    pub completed: u64,

    /// Site triggers that failed today
    pub failed: u64,
}

impl TodayStats {
    /// Success rate in percent (0 when nothing ran)
    pub fn success_rate(&self) -> f64 {
        let total = self.completed + self.failed;
        if total == 0 {
            0.0
        } else {
            (self.completed as f64 / total as f64) * 100.0
        }
    }
}

/// Reader/writer for run statistics in the shared cache
#[derive(Clone)]
pub struct StatsAggregator {
    cache: Cache,
}

impl StatsAggregator {
    /// Create an aggregator over the shared cache
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Fold one finalized run into the cumulative stats
    ///
    /// Increments `total_runs`, stamps `last_run_at`, adds to
    /// `total_sites_processed` and overwrites `sites_processed_last_run`.
    pub async fn record_run(&self, sites_processed: u64) -> Result<NetworkStats, CacheError> {
        let mut stats = self.read().await?;

        stats.total_runs += 1;
        stats.last_run_at = Some(Utc::now());
        stats.total_sites_processed += sites_processed;
        stats.sites_processed_last_run = sites_processed;

        // Stored without expiry: these are cumulative counters, not a cache.
        self.cache.set(STATS_KEY, &stats, None).await?;

        tracing::info!(
            total_runs = stats.total_runs,
            sites_processed = sites_processed,
            "Run folded into network stats"
        );

        Ok(stats)
    }

    /// Current cumulative stats, defaults filled in for missing fields
    pub async fn read(&self) -> Result<NetworkStats, CacheError> {
        Ok(self.cache.get(STATS_KEY).await?.unwrap_or_default())
    }

    /// Count one site-trigger outcome toward today's counters
    pub async fn record_outcome(&self, succeeded: bool) -> Result<(), CacheError> {
        let key = Self::today_key(Utc::now());
        let mut today: TodayStats = self.cache.get(&key).await?.unwrap_or_default();

        if succeeded {
            today.completed += 1;
        } else {
            today.failed += 1;
        }

        self.cache.set(&key, &today, Some(TODAY_TTL)).await
    }

    /// Today's counters, zeroed if nothing ran yet
    pub async fn read_today(&self) -> Result<TodayStats, CacheError> {
        let key = Self::today_key(Utc::now());
        Ok(self.cache.get(&key).await?.unwrap_or_default())
    }

    fn today_key(now: DateTime<Utc>) -> String {
        format!("stats:day:{}", now.format("%Y-%m-%d"))
    }
}
