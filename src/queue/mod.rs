//! Typed boundary to the asynchronous job queue
//!
//! The queue/worker engine that actually executes per-site jobs (with its own
//! retry and backoff policy) is an external collaborator. This module defines
//! the types the core speaks at that boundary so internal logic never
//! branches on loosely-shaped collaborator responses:
//! - [`SiteJob`]: the payload of one per-site task
//! - [`JobQueue`]: enqueue + introspection interface
//! - [`JobHandler`]: what a worker invokes for each job
//! - [`TaskRecord`]: completed-task record with a single normalized
//!   `finished_at` field, regardless of how the underlying engine stores
//!   its timestamps
//!
//! [`local::LocalJobQueue`] is the in-process implementation shipped with
//! the binary.

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use local::LocalJobQueue;

/// Queue identifier for a submitted job
pub type JobId = u64;

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Submission was rejected or lost
    #[error("failed to queue job: {0}")]
    Submit(String),

    /// The queue engine is not reachable
    #[error("job queue unavailable: {0}")]
    Unavailable(String),
}

/// Terminal failure of one job execution, signaled back to the queue so its
/// retry policy can apply
#[derive(Error, Debug, Clone)]
#[error("{reason}")]
pub struct JobFailure {
    /// Human-readable failure reason, preserved verbatim
    pub reason: String,
}

impl JobFailure {
    /// Wrap a failure reason
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Payload of one per-site task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteJob {
    /// Batch this job belongs to
    pub run_id: String,

    /// Site identifier
    pub site_id: u64,

    /// Site base URL
    pub site_url: String,
}

/// Executor invoked by the queue's workers for each job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute one job; `Err` signals the queue's failure handling
    async fn handle(&self, job: &SiteJob) -> Result<(), JobFailure>;
}

/// Enqueue/query interface of the job queue engine
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Submit a job for asynchronous execution
    async fn enqueue(&self, job: SiteJob) -> Result<JobId, QueueError>;

    /// Current queue depth counters
    async fn status(&self) -> Result<QueueStatus, QueueError>;

    /// Most recent completed tasks, newest first
    async fn recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, QueueError>;
}

/// Queue depth counters for the status surface
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Jobs waiting for a worker
    pub pending: usize,

    /// Jobs currently executing
    pub in_flight: usize,

    /// Jobs that exhausted their attempts
    pub failed: usize,
}

/// Record of one completed task at the queue boundary
///
/// `finished_at` is the one timestamp the core reads; adapters for external
/// engines must normalize whatever the engine stores into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Queue job identifier
    pub job_id: JobId,

    /// Site the job targeted
    pub site_id: u64,

    /// Attempts consumed
    pub attempts: u32,

    /// Whether the final attempt succeeded
    pub succeeded: bool,

    /// When the final attempt finished
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_job_roundtrip() {
        let job = SiteJob {
            run_id: "1700000000:abc".to_string(),
            site_id: 7,
            site_url: "https://seven.example.org".to_string(),
        };

        let json = serde_json::to_string(&job).unwrap();
        let back: SiteJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn test_job_failure_preserves_reason() {
        let failure = JobFailure::new("connection reset by peer");
        assert_eq!(failure.to_string(), "connection reset by peer");
    }
}
