//! Per-site trigger execution
//!
//! The unit of work the job queue's workers run for a single site: one
//! blocking HTTP GET against the site's maintenance endpoint with a bounded
//! timeout, classified into a [`TaskOutcome`] value. Failures are signaled
//! back to the queue as a terminal [`JobFailure`] so its retry policy
//! applies; the core never retries on its own.

use async_trait::async_trait;
use std::time::Instant;
use thiserror::Error;
use url::Url;

use crate::config::SiteTriggerConfig;
use crate::metrics;
use crate::queue::{JobFailure, JobHandler, SiteJob};

use super::stats::StatsAggregator;
use super::tracker::RunTracker;

/// Task construction/URL errors
#[derive(Error, Debug)]
pub enum TaskError {
    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// Site URL could not be combined with the trigger path
    #[error("invalid trigger URL for {base}: {reason}")]
    InvalidUrl { base: String, reason: String },
}

/// Classified result of one trigger attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Response status was in [200, 300)
    Success {
        /// HTTP status received
        status: u16,
    },

    /// Transport error or non-2xx status
    Failure {
        /// Failure text; transport errors are preserved verbatim
        reason: String,

        /// HTTP status, when a response was received at all
        status: Option<u16>,
    },
}

impl TaskOutcome {
    /// Whether the trigger landed
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Executor for per-site trigger jobs
pub struct SiteTask {
    client: reqwest::Client,
    config: SiteTriggerConfig,
    tracker: RunTracker,
    stats: StatsAggregator,
}

impl SiteTask {
    /// Build the executor with its HTTP client
    ///
    /// TLS verification follows `config.verify_tls` (off by default: the
    /// registered site URLs are same-owner infrastructure).
    pub fn new(
        config: SiteTriggerConfig,
        tracker: RunTracker,
        stats: StatsAggregator,
    ) -> Result<Self, TaskError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .danger_accept_invalid_certs(!config.verify_tls)
            .user_agent(concat!("fleetcron/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            config,
            tracker,
            stats,
        })
    }

    /// Build the maintenance URL for a site
    pub fn trigger_url(&self, base_url: &str) -> Result<Url, TaskError> {
        let invalid = |reason: String| TaskError::InvalidUrl {
            base: base_url.to_string(),
            reason,
        };

        let base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;

        // The trigger path may carry a query marker; join() would drop the
        // base path, so splice path and query explicitly.
        let (path, query) = match self.config.trigger_path.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (self.config.trigger_path.as_str(), None),
        };

        let mut url = base;
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query);

        Ok(url)
    }

    /// Trigger one site and classify the result
    pub async fn execute(&self, site_id: u64, site_url: &str) -> TaskOutcome {
        let url = match self.trigger_url(site_url) {
            Ok(url) => url,
            Err(e) => {
                return TaskOutcome::Failure {
                    reason: e.to_string(),
                    status: None,
                }
            }
        };

        self.log_detail(format_args!("triggering site {site_id} at {url}"));
        let started = Instant::now();

        let outcome = match self.client.get(url.clone()).send().await {
            Err(e) => TaskOutcome::Failure {
                reason: e.to_string(),
                status: None,
            },
            Ok(response) => {
                let status = response.status().as_u16();
                if (200..300).contains(&status) {
                    TaskOutcome::Success { status }
                } else {
                    TaskOutcome::Failure {
                        reason: format!("HTTP {status}: cron request failed"),
                        status: Some(status),
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        metrics::observe_site_trigger(outcome.is_success(), elapsed);

        match &outcome {
            TaskOutcome::Success { status } => {
                self.log_detail(format_args!(
                    "site {site_id} responded {status} in {:.2}s",
                    elapsed.as_secs_f64()
                ));
            }
            TaskOutcome::Failure { reason, .. } => {
                tracing::warn!(
                    site_id = site_id,
                    url = %url,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Site trigger failed: {reason}"
                );
            }
        }

        outcome
    }

    /// Detailed diagnostics, gated separately from normal operation
    fn log_detail(&self, message: std::fmt::Arguments<'_>) {
        if self.config.detailed_logging {
            tracing::info!(target: "fleetcron::site_task", "{message}");
        }
    }
}

#[async_trait]
impl JobHandler for SiteTask {
    /// Execute the job, report to the run tracker, and signal failures to
    /// the queue's failure handling
    async fn handle(&self, job: &SiteJob) -> Result<(), JobFailure> {
        let outcome = self.execute(job.site_id, &job.site_url).await;

        // Success and failure count equally toward the batch's processed
        // total; tracker errors must not turn a delivered trigger into a
        // queue-level retry.
        if let Err(e) = self.tracker.increment(Some(&job.run_id)).await {
            tracing::error!(run_id = %job.run_id, error = %e, "Run increment failed");
        } else if let Err(e) = self.tracker.maybe_finalize().await {
            tracing::error!(run_id = %job.run_id, error = %e, "Run finalization failed");
        }

        if let Err(e) = self.stats.record_outcome(outcome.is_success()).await {
            tracing::error!(error = %e, "Failed to record task outcome");
        }

        match outcome {
            TaskOutcome::Success { .. } => Ok(()),
            TaskOutcome::Failure { reason, .. } => Err(JobFailure::new(reason)),
        }
    }
}
