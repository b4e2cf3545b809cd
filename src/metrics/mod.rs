//! Prometheus metrics for the trigger gateway and site tasks
//!
//! Call [`init_metrics`] once at startup to register everything. If
//! registration fails (or was never attempted, as in most tests), recording
//! helpers are no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec, Encoder,
    HistogramVec, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

/// Container for all gateway metrics
struct GatewayMetrics {
    triggers: CounterVec,
    rate_limited: Counter,
    auth_failures: Counter,
    lock_contention: Counter,
    sites_dispatched: Counter,
    runs_finalized: Counter,
    site_trigger_duration: HistogramVec,
}

/// Global storage for metrics
static METRICS: OnceLock<GatewayMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

/// Initialize all Prometheus metrics
///
/// Should be called once at application startup. On registration failure
/// the error is returned and all recording helpers stay no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = GatewayMetrics {
        triggers: register_counter_vec!(
            "fleetcron_triggers_total",
            "Trigger requests that passed the security gate",
            &["mode", "outcome"]
        )?,
        rate_limited: register_counter!(
            "fleetcron_rate_limited_total",
            "Trigger requests rejected by the rate limiter"
        )?,
        auth_failures: register_counter!(
            "fleetcron_auth_failures_total",
            "Trigger requests rejected by token authentication"
        )?,
        lock_contention: register_counter!(
            "fleetcron_lock_contention_total",
            "Trigger requests refused because a run was active or too recent"
        )?,
        sites_dispatched: register_counter!(
            "fleetcron_sites_dispatched_total",
            "Site jobs submitted to the queue"
        )?,
        runs_finalized: register_counter!(
            "fleetcron_runs_finalized_total",
            "Dispatch batches folded into network stats"
        )?,
        site_trigger_duration: register_histogram_vec!(
            "fleetcron_site_trigger_duration_seconds",
            "Duration of per-site trigger requests",
            &["outcome"]
        )?,
    };

    METRICS
        .set(metrics)
        .map_err(|_| "metrics already initialized")?;

    Ok(())
}

/// Record a trigger request that reached execution
pub fn record_trigger(mode: &str, success: bool) {
    if let Some(m) = METRICS.get() {
        let outcome = if success { "success" } else { "failure" };
        m.triggers.with_label_values(&[mode, outcome]).inc();
    }
}

/// Record a rate-limit rejection
pub fn record_rate_limited() {
    if let Some(m) = METRICS.get() {
        m.rate_limited.inc();
    }
}

/// Record an authentication failure
pub fn record_auth_failure() {
    if let Some(m) = METRICS.get() {
        m.auth_failures.inc();
    }
}

/// Record a lock-contention rejection
pub fn record_lock_contention() {
    if let Some(m) = METRICS.get() {
        m.lock_contention.inc();
    }
}

/// Record submitted site jobs
pub fn record_dispatch(count: u64) {
    if let Some(m) = METRICS.get() {
        m.sites_dispatched.inc_by(count as f64);
    }
}

/// Record a finalized run
pub fn record_run_finalized() {
    if let Some(m) = METRICS.get() {
        m.runs_finalized.inc();
    }
}

/// Observe one site-trigger duration
pub fn observe_site_trigger(success: bool, elapsed: Duration) {
    if let Some(m) = METRICS.get() {
        let outcome = if success { "success" } else { "failure" };
        m.site_trigger_duration
            .with_label_values(&[outcome])
            .observe(elapsed.as_secs_f64());
    }
}

/// Encode the default registry in Prometheus text format
pub fn encode() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
