//! Batch dispatch: fan-out into the job queue, plus the legacy inline runner
//!
//! A dispatch takes the current eligible site list, starts run tracking for
//! exactly that batch size, and submits one [`SiteJob`](crate::queue::SiteJob)
//! per site. Submission outcomes are what the report counts; execution
//! outcomes arrive asynchronously through the run tracker.
//!
//! [`ImmediateRunner`] is the synchronous alternative for legacy/manual
//! invocation: it triggers every site inline and folds the result into the
//! stats directly, with no run state to reconcile.

pub mod stats;
pub mod task;
pub mod tracker;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use crate::metrics;
use crate::queue::{JobQueue, SiteJob};
use crate::registry::{CachedDirectory, DirectoryError};

pub use stats::{NetworkStats, StatsAggregator, TodayStats};
pub use task::{SiteTask, TaskError, TaskOutcome};
pub use tracker::{FinalizedRun, RunState, RunTracker, TrackerError};

/// Dispatch errors
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Site directory failure; nothing was dispatched
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    /// Run tracking could not be initialized; nothing was dispatched
    #[error("failed to start run tracking: {0}")]
    Tracker(#[from] tracker::TrackerError),
}

/// Result of one dispatch (or immediate run), the endpoint's response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Whether the whole batch was submitted (or executed) cleanly
    pub success: bool,

    /// Human-readable summary or aggregated error text
    pub message: String,

    /// Sites submitted (queued mode) or processed (immediate mode)
    pub count: u64,

    /// Wall-clock seconds the dispatch took
    pub execution_time: f64,
}

impl DispatchReport {
    fn failure(message: impl Into<String>, count: u64, started: Instant) -> Self {
        Self {
            success: false,
            message: message.into(),
            count,
            execution_time: elapsed_secs(started),
        }
    }
}

fn elapsed_secs(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100.0).round() / 100.0
}

// ============================================================================
// Queued dispatch
// ============================================================================

/// Fan-out of one job per eligible site into the job queue
pub struct Dispatcher {
    directory: Arc<CachedDirectory>,
    queue: Arc<dyn JobQueue>,
    tracker: RunTracker,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        directory: Arc<CachedDirectory>,
        queue: Arc<dyn JobQueue>,
        tracker: RunTracker,
    ) -> Self {
        Self {
            directory,
            queue,
            tracker,
        }
    }

    /// Fresh run identifier: dispatch time plus a random component
    fn new_run_id() -> String {
        format!("{}:{}", Utc::now().timestamp(), Uuid::new_v4().simple())
    }

    /// Dispatch the current batch
    ///
    /// Directory failures propagate without partial dispatch. An empty site
    /// list reports failure with `count: 0` and no run state. Submission
    /// failures mark the report failed with aggregated error text while the
    /// remaining sites are still submitted.
    pub async fn dispatch_all(&self) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();

        let sites = self.directory.eligible_sites().await?;
        if sites.is_empty() {
            return Ok(DispatchReport::failure(
                "No eligible sites found in the directory",
                0,
                started,
            ));
        }

        let run_id = Self::new_run_id();
        self.tracker.start(&run_id, sites.len() as u64).await?;

        let mut queued = 0u64;
        let mut errors: Vec<String> = Vec::new();

        for site in &sites {
            let job = SiteJob {
                run_id: run_id.clone(),
                site_id: site.id,
                site_url: site.base_url.clone(),
            };

            match self.queue.enqueue(job).await {
                Ok(_) => queued += 1,
                Err(e) => errors.push(format!("Error queuing {}: {e}", site.base_url)),
            }
        }

        metrics::record_dispatch(queued);

        if !errors.is_empty() {
            tracing::error!(
                run_id = %run_id,
                queued = queued,
                failed = errors.len(),
                "Dispatch completed with submission errors"
            );
            return Ok(DispatchReport::failure(errors.join("\n"), queued, started));
        }

        tracing::info!(run_id = %run_id, queued = queued, "Dispatch complete");

        Ok(DispatchReport {
            success: true,
            message: format!("Queued {queued} sites for cron processing"),
            count: queued,
            execution_time: elapsed_secs(started),
        })
    }
}

// ============================================================================
// Immediate (synchronous) dispatch
// ============================================================================

/// Inline runner for legacy/manual invocation
///
/// Triggers every eligible site one after another within the request and
/// records the processed count straight into the network stats.
pub struct ImmediateRunner {
    directory: Arc<CachedDirectory>,
    task: Arc<SiteTask>,
    stats: StatsAggregator,
}

impl ImmediateRunner {
    /// Create an immediate runner
    pub fn new(directory: Arc<CachedDirectory>, task: Arc<SiteTask>, stats: StatsAggregator) -> Self {
        Self {
            directory,
            task,
            stats,
        }
    }

    /// Trigger all eligible sites inline
    pub async fn run_all(&self) -> Result<DispatchReport, DispatchError> {
        let started = Instant::now();

        let sites = self.directory.eligible_sites().await?;
        if sites.is_empty() {
            return Ok(DispatchReport::failure(
                "No eligible sites found in the directory",
                0,
                started,
            ));
        }

        let mut processed = 0u64;
        let mut errors: Vec<String> = Vec::new();

        for site in &sites {
            match self.task.execute(site.id, &site.base_url).await {
                TaskOutcome::Success { .. } => processed += 1,
                TaskOutcome::Failure { reason, .. } => {
                    errors.push(format!("Error for {}: {reason}", site.base_url));
                }
            }
        }

        if let Err(e) = self.stats.record_run(processed).await {
            tracing::error!(error = %e, "Failed to record immediate run stats");
        }

        if !errors.is_empty() {
            return Ok(DispatchReport::failure(errors.join("\n"), processed, started));
        }

        Ok(DispatchReport {
            success: true,
            message: format!("Processed {processed} sites successfully"),
            count: processed,
            execution_time: elapsed_secs(started),
        })
    }
}
