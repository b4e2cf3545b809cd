//! HTTP handlers for the trigger gateway
//!
//! `/trigger` walks the request through rate limiting, token authentication
//! and the execution lock before anything is dispatched; each gate
//! short-circuits with its own status code (429, 401, 409). The lock is
//! released on every exit path out of the execution section, so a failed
//! dispatch cannot wedge the fleet beyond the lease TTL.

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::dispatch::{NetworkStats, TodayStats};
use crate::lock::LockInfo;
use crate::metrics;
use crate::queue::QueueStatus;
use crate::security::{client_key, log_security_event, SecurityEvent};

use super::response::{render_denial, render_report, ApiResponse, OutputFormat};
use super::AppState;

/// Create the gateway router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/trigger", get(trigger))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/metrics", get(metrics_text))
        .with_state(state)
}

// ============================================================================
// Trigger handler
// ============================================================================

/// Query modifiers on the trigger endpoint
#[derive(Debug, Deserialize)]
pub struct TriggerParams {
    /// Shared-secret token
    token: Option<String>,

    /// `immediate=1` selects the synchronous legacy path
    immediate: Option<String>,

    /// Presence selects CI-friendly plain-text output
    ga: Option<String>,
}

impl TriggerParams {
    fn format(&self) -> OutputFormat {
        if self.ga.is_some() {
            OutputFormat::CiAnnotations
        } else {
            OutputFormat::Json
        }
    }

    fn is_immediate(&self) -> bool {
        self.immediate.as_deref() == Some("1")
    }
}

/// The trigger endpoint
async fn trigger(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let format = params.format();
    let client = client_key(&headers, Some(addr.ip()));

    // Rate limit first: unauthenticated callers must not be able to probe
    // the token check at full speed.
    let rate_config = &state.config.rate_limit;
    match state
        .rate_limiter
        .admit(&client, rate_config.max_requests, rate_config.window())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            log_security_event(SecurityEvent::RateLimitExceeded, &client, "Rate limit exceeded");
            metrics::record_rate_limited();
            return render_denial(
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.",
                format,
            );
        }
        Err(e) => return internal_error(e.into(), format),
    }

    if !state.authenticator.verify(params.token.as_deref()).await {
        log_security_event(
            SecurityEvent::AuthenticationFailed,
            &client,
            "Invalid or missing token",
        );
        metrics::record_auth_failure();
        return render_denial(
            StatusCode::UNAUTHORIZED,
            "Authentication required. Configure an endpoint token.",
            format,
        );
    }
    log_security_event(SecurityEvent::AuthenticationSuccess, &client, "Valid token provided");

    let lock_config = &state.config.lock;
    match state
        .lock
        .acquire(lock_config.lease_ttl(), lock_config.min_interval())
        .await
    {
        Ok(true) => {}
        Ok(false) => {
            log_security_event(
                SecurityEvent::ConcurrentExecution,
                &client,
                "Attempt to run while already executing or too soon",
            );
            metrics::record_lock_contention();
            return render_denial(
                StatusCode::CONFLICT,
                "Cron job already running or ran too recently",
                format,
            );
        }
        Err(e) => return internal_error(e.into(), format),
    }

    // Execution section: the lock is released on every path out of it.
    let mode = if params.is_immediate() { "immediate" } else { "queued" };
    let result = if params.is_immediate() {
        state.immediate.run_all().await
    } else {
        state.dispatcher.dispatch_all().await
    };

    if let Err(e) = state.lock.release().await {
        tracing::error!(error = %e, "Failed to release execution lock; lease TTL will expire it");
    }

    match result {
        Ok(report) => {
            metrics::record_trigger(mode, report.success);
            log_security_event(
                SecurityEvent::SuccessfulExecution,
                &client,
                &format!("Cron executed for {} sites", report.count),
            );
            render_report(&report, format)
        }
        Err(e) => {
            metrics::record_trigger(mode, false);
            internal_error(e.into(), format)
        }
    }
}

fn internal_error(error: crate::Error, format: OutputFormat) -> Response {
    tracing::error!(
        category = error.category().as_str(),
        error = %error,
        "Trigger request failed"
    );
    render_denial(
        StatusCode::INTERNAL_SERVER_ERROR,
        &error.to_string(),
        format,
    )
}

// ============================================================================
// Introspection handlers
// ============================================================================

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
    cache_reachable: bool,
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache_reachable = state.cache.ping().await.is_ok();
    let status = if cache_reachable { "healthy" } else { "degraded" };

    Json(ApiResponse::success(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cache_reachable,
    }))
}

/// Operator-facing status response
#[derive(Debug, Serialize)]
struct StatusResponse {
    locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock: Option<LockInfo>,
    token_configured: bool,
    queue: QueueStatus,
    sites_cache_age_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    current_run: Option<crate::dispatch::RunState>,
    uptime_secs: u64,
}

/// Status endpoint: lock holder, queue depth, cache age, live run
async fn status(State(state): State<AppState>) -> Response {
    let lock = match state.lock.peek().await {
        Ok(lock) => lock,
        Err(e) => return status_error(e.into()),
    };

    let queue = match state.queue.status().await {
        Ok(queue) => queue,
        Err(e) => return status_error(e.into()),
    };

    let sites_cache_age_secs = match state.directory.cache_age().await {
        Ok(age) => age.map(|a| a.num_seconds()),
        Err(e) => return status_error(e.into()),
    };

    let current_run = match state.tracker.current().await {
        Ok(run) => run,
        Err(e) => return status_error(e.into()),
    };

    Json(ApiResponse::success(StatusResponse {
        locked: lock.is_some(),
        lock,
        token_configured: state.authenticator.is_configured().await,
        queue,
        sites_cache_age_secs,
        current_run,
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
    .into_response()
}

fn status_error(error: crate::Error) -> Response {
    tracing::error!(category = error.category().as_str(), error = %error, "Status read failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error(error.to_string())),
    )
        .into_response()
}

/// Stats response: cumulative counters plus today's outcomes
#[derive(Debug, Serialize)]
struct StatsResponse {
    network: NetworkStats,
    today: TodayStats,
    success_rate_today: f64,
}

/// Stats endpoint
async fn stats(State(state): State<AppState>) -> Response {
    let network = match state.stats.read().await {
        Ok(stats) => stats,
        Err(e) => return status_error(e.into()),
    };

    let today = match state.stats.read_today().await {
        Ok(today) => today,
        Err(e) => return status_error(e.into()),
    };

    let success_rate_today = today.success_rate();

    Json(ApiResponse::success(StatsResponse {
        network,
        today,
        success_rate_today,
    }))
    .into_response()
}

/// Prometheus text endpoint
async fn metrics_text() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode(),
    )
}
