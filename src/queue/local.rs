//! In-process job queue with a bounded worker pool
//!
//! Stand-in for an external queue engine when the coordinator runs
//! standalone. Jobs are drained in small batches and executed with a
//! configurable concurrency cap (1 recommended, so one dispatch storm cannot
//! overlap itself). Delivery is at-least-once: a failed attempt is re-queued
//! until the attempt cap is reached, then recorded as failed.

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::config::QueueConfig;

use super::{JobHandler, JobId, JobQueue, QueueError, QueueStatus, SiteJob, TaskRecord};

/// Completed-task records kept for introspection
const RECENT_CAPACITY: usize = 256;

struct QueuedJob {
    id: JobId,
    job: SiteJob,
    attempt: u32,
}

#[derive(Default)]
struct QueueState {
    pending: AtomicUsize,
    in_flight: AtomicUsize,
    failed: AtomicUsize,
    next_id: AtomicU64,
    records: RwLock<VecDeque<TaskRecord>>,
}

impl QueueState {
    async fn record(&self, record: TaskRecord) {
        let mut records = self.records.write().await;
        if records.len() == RECENT_CAPACITY {
            records.pop_back();
        }
        records.push_front(record);
    }
}

/// Tokio-based queue implementation for standalone deployments
pub struct LocalJobQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    state: Arc<QueueState>,
    worker: tokio::task::JoinHandle<()>,
}

impl LocalJobQueue {
    /// Start the queue with its worker loop
    pub fn start(handler: Arc<dyn JobHandler>, config: QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());

        let worker = tokio::spawn(Self::run_workers(
            rx,
            tx.clone(),
            handler,
            state.clone(),
            config,
        ));

        Self { tx, state, worker }
    }

    /// Stop the worker loop; queued jobs are dropped
    pub fn abort(&self) {
        self.worker.abort();
    }

    async fn run_workers(
        mut rx: mpsc::UnboundedReceiver<QueuedJob>,
        tx: mpsc::UnboundedSender<QueuedJob>,
        handler: Arc<dyn JobHandler>,
        state: Arc<QueueState>,
        config: QueueConfig,
    ) {
        tracing::info!(
            concurrency = config.concurrency,
            batch_size = config.batch_size,
            "Job queue workers started"
        );

        while let Some(first) = rx.recv().await {
            // Drain a small batch; the batch completes before the next pull
            // so memory stays bounded at batch_size jobs.
            let mut batch = vec![first];
            while batch.len() < config.batch_size.max(1) {
                match rx.try_recv() {
                    Ok(job) => batch.push(job),
                    Err(_) => break,
                }
            }

            stream::iter(batch)
                .for_each_concurrent(config.concurrency.max(1), |queued| {
                    let handler = handler.clone();
                    let state = state.clone();
                    let tx = tx.clone();
                    let max_attempts = config.max_attempts;

                    async move {
                        state.pending.fetch_sub(1, Ordering::SeqCst);
                        state.in_flight.fetch_add(1, Ordering::SeqCst);

                        let result = handler.handle(&queued.job).await;

                        state.in_flight.fetch_sub(1, Ordering::SeqCst);

                        match result {
                            Ok(()) => {
                                state
                                    .record(TaskRecord {
                                        job_id: queued.id,
                                        site_id: queued.job.site_id,
                                        attempts: queued.attempt,
                                        succeeded: true,
                                        finished_at: Utc::now(),
                                    })
                                    .await;
                            }
                            Err(failure) if queued.attempt < max_attempts => {
                                tracing::warn!(
                                    job_id = queued.id,
                                    site_id = queued.job.site_id,
                                    attempt = queued.attempt,
                                    error = %failure,
                                    "Job failed, re-queueing"
                                );
                                state.pending.fetch_add(1, Ordering::SeqCst);
                                let _ = tx.send(QueuedJob {
                                    id: queued.id,
                                    job: queued.job,
                                    attempt: queued.attempt + 1,
                                });
                            }
                            Err(failure) => {
                                tracing::error!(
                                    job_id = queued.id,
                                    site_id = queued.job.site_id,
                                    attempts = queued.attempt,
                                    error = %failure,
                                    "Job failed permanently"
                                );
                                state.failed.fetch_add(1, Ordering::SeqCst);
                                state
                                    .record(TaskRecord {
                                        job_id: queued.id,
                                        site_id: queued.job.site_id,
                                        attempts: queued.attempt,
                                        succeeded: false,
                                        finished_at: Utc::now(),
                                    })
                                    .await;
                            }
                        }
                    }
                })
                .await;
        }
    }
}

#[async_trait]
impl JobQueue for LocalJobQueue {
    async fn enqueue(&self, job: SiteJob) -> Result<JobId, QueueError> {
        let id = self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1;

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        self.tx
            .send(QueuedJob {
                id,
                job,
                attempt: 1,
            })
            .map_err(|_| {
                self.state.pending.fetch_sub(1, Ordering::SeqCst);
                QueueError::Unavailable("worker loop stopped".to_string())
            })?;

        Ok(id)
    }

    async fn status(&self) -> Result<QueueStatus, QueueError> {
        Ok(QueueStatus {
            pending: self.state.pending.load(Ordering::SeqCst),
            in_flight: self.state.in_flight.load(Ordering::SeqCst),
            failed: self.state.failed.load(Ordering::SeqCst),
        })
    }

    async fn recent_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, QueueError> {
        let records = self.state.records.read().await;
        Ok(records.iter().take(limit).cloned().collect())
    }
}

impl Drop for LocalJobQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
