//! Per-run completion tracking
//!
//! One `RunState` lives in the shared cache per dispatch batch: how many
//! tasks were expected and how many have reported back. Increments are
//! tolerant (a stale batch's workers cannot corrupt the live run) and
//! finalization is idempotent: exactly one caller folds a completed run into
//! the network stats, keyed off who actually deleted the run-state entry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::cache::{Cache, CacheError};

use super::stats::{NetworkStats, StatsAggregator};

const RUN_KEY: &str = "run";

/// A run that never finalizes is evidence of a dead batch; its state ages
/// out after a day rather than blocking introspection forever
const RUN_STATE_TTL: Duration = Duration::from_secs(24 * 3600);

/// Tracker errors
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Shared cache failure
    #[error("run tracking storage error: {0}")]
    Storage(#[from] CacheError),

    /// `start` called with nothing to track
    #[error("a run must expect at least one task")]
    EmptyRun,
}

/// Live state of one dispatch batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    /// Opaque batch identifier
    pub run_id: String,

    /// Tasks submitted for this batch
    pub expected: u64,

    /// Tasks that have reported completion (success or failure alike)
    pub processed: u64,

    /// When the batch was dispatched
    pub started_at: DateTime<Utc>,
}

impl RunState {
    /// Whether every expected task has reported
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && self.processed >= self.expected
    }
}

/// Result of a successful finalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedRun {
    /// The finalized batch
    pub run_id: String,

    /// Tasks processed
    pub processed: u64,

    /// When the batch was dispatched
    pub started_at: DateTime<Utc>,

    /// Network stats after folding this run in
    pub stats: NetworkStats,
}

/// Expected-vs-processed bookkeeping for dispatch batches
#[derive(Clone)]
pub struct RunTracker {
    cache: Cache,
    stats: StatsAggregator,
}

impl RunTracker {
    /// Create a tracker over the shared cache
    pub fn new(cache: Cache, stats: StatsAggregator) -> Self {
        Self { cache, stats }
    }

    /// Begin tracking a new batch
    ///
    /// Overwrites any stale state from an earlier batch that failed to
    /// finalize; only one run is live at a time.
    pub async fn start(&self, run_id: &str, expected: u64) -> Result<RunState, TrackerError> {
        if expected == 0 {
            return Err(TrackerError::EmptyRun);
        }

        if let Some(stale) = self.current().await? {
            tracing::warn!(
                stale_run = %stale.run_id,
                processed = stale.processed,
                expected = stale.expected,
                "Overwriting unfinalized run state"
            );
        }

        let state = RunState {
            run_id: run_id.to_string(),
            expected,
            processed: 0,
            started_at: Utc::now(),
        };
        self.cache.set(RUN_KEY, &state, Some(RUN_STATE_TTL)).await?;

        tracing::info!(run_id = %run_id, expected = expected, "Run tracking started");
        Ok(state)
    }

    /// Count one completed task toward the live run
    ///
    /// An increment tagged with a `run_id` that does not match the live run
    /// is ignored rather than corrupting it; an untagged increment applies
    /// to whichever run is live. Returns the updated state, or `None` when
    /// the increment did not apply.
    pub async fn increment(&self, run_id: Option<&str>) -> Result<Option<RunState>, TrackerError> {
        let Some(mut state) = self.current().await? else {
            tracing::debug!(run_id = ?run_id, "Increment with no live run ignored");
            return Ok(None);
        };

        if let Some(id) = run_id {
            if id != state.run_id {
                tracing::warn!(
                    live_run = %state.run_id,
                    foreign_run = %id,
                    "Increment for foreign run ignored"
                );
                return Ok(None);
            }
        }

        state.processed += 1;
        self.cache.set(RUN_KEY, &state, Some(RUN_STATE_TTL)).await?;

        Ok(Some(state))
    }

    /// Finalize the live run if every expected task has reported
    ///
    /// Folds the processed count into [`NetworkStats`] and deletes the run
    /// state. Only the caller whose delete actually removed the key records
    /// the stats, so concurrent finalizers cannot double-count.
    pub async fn maybe_finalize(&self) -> Result<Option<FinalizedRun>, TrackerError> {
        let Some(state) = self.current().await? else {
            return Ok(None);
        };

        if !state.is_complete() {
            return Ok(None);
        }

        if !self.cache.delete(RUN_KEY).await? {
            // Someone else finalized between our read and delete.
            return Ok(None);
        }

        let stats = self.stats.record_run(state.processed).await?;
        crate::metrics::record_run_finalized();

        tracing::info!(
            run_id = %state.run_id,
            processed = state.processed,
            "Run finalized"
        );

        Ok(Some(FinalizedRun {
            run_id: state.run_id,
            processed: state.processed,
            started_at: state.started_at,
            stats,
        }))
    }

    /// The live run, if any
    pub async fn current(&self) -> Result<Option<RunState>, TrackerError> {
        Ok(self.cache.get(RUN_KEY).await?)
    }
}
