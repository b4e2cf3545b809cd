//! Integration tests for the trigger gateway
//!
//! These drive the full router through tower's oneshot, covering the
//! security gates (429/401/409), both execution modes, and the CI output
//! format.

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use fleetcron::cache::MemoryBackend;
use fleetcron::config::Config;
use fleetcron::gateway::Gateway;
use fleetcron::registry::{Site, StaticDirectory};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "integration-test-token";

/// Build a gateway over the in-memory cache with a static site list
fn gateway_with(config: Config, sites: Vec<Site>) -> Gateway {
    Gateway::new(
        config,
        Arc::new(MemoryBackend::new()),
        Arc::new(StaticDirectory::new(sites)),
    )
    .unwrap()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.token = Some(TOKEN.to_string());
    // No throttling between test requests unless a test opts in.
    config.lock.min_interval_secs = 0;
    config
}

fn request(uri: &str) -> Request<Body> {
    let addr: SocketAddr = "203.0.113.10:4000".parse().unwrap();
    Request::builder()
        .uri(uri)
        .extension(ConnectInfo(addr))
        .body(Body::empty())
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn text_body(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Security gate tests
// ============================================================================

#[tokio::test]
async fn test_missing_token_is_401_and_nothing_runs() {
    let gateway = gateway_with(test_config(), vec![Site::new(1, "https://one.example.org")]);
    let state = gateway.state();

    let response = gateway.build_router().oneshot(request("/trigger")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // No lock acquired, no dispatch attempted.
    assert!(!state.lock.is_locked().await.unwrap());
    assert!(state.tracker.current().await.unwrap().is_none());
}

#[tokio::test]
async fn test_wrong_token_is_401() {
    let gateway = gateway_with(test_config(), vec![]);

    let response = gateway
        .build_router()
        .oneshot(request("/trigger?token=wrong-token-value"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_no_configured_token_fails_closed() {
    let mut config = test_config();
    config.token = None;
    let gateway = gateway_with(config, vec![]);

    let response = gateway
        .build_router()
        .oneshot(request(&format!("/trigger?token={TOKEN}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_rate_limit_exceeded_is_429() {
    let mut config = test_config();
    config.rate_limit.max_requests = 2;
    let gateway = gateway_with(config, vec![]);
    let router = gateway.build_router();

    // Two admitted (regardless of their own outcome), third rejected.
    for _ in 0..2 {
        let response = router.clone().oneshot(request("/trigger")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = router.oneshot(request("/trigger")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_lock_held_is_409_and_tracker_untouched() {
    let gateway = gateway_with(test_config(), vec![Site::new(1, "https://one.example.org")]);
    let state = gateway.state();

    // Simulate a run in progress elsewhere in the fleet.
    assert!(state
        .lock
        .acquire(Duration::from_secs(300), Duration::from_secs(0))
        .await
        .unwrap());

    let response = gateway
        .build_router()
        .oneshot(request(&format!("/trigger?token={TOKEN}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert!(state.tracker.current().await.unwrap().is_none());
}

#[tokio::test]
async fn test_min_interval_yields_409_on_second_request() {
    let mut config = test_config();
    config.lock.min_interval_secs = 60;
    let gateway = gateway_with(config, vec![]);
    let router = gateway.build_router();

    // First trigger runs (and records the last-run marker on acquisition).
    let first = router
        .clone()
        .oneshot(request(&format!("/trigger?token={TOKEN}")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // Five seconds later (well within min_interval) -> refused.
    let second = router
        .oneshot(request(&format!("/trigger?token={TOKEN}")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

// ============================================================================
// Dispatch tests
// ============================================================================

#[tokio::test]
async fn test_queued_dispatch_reports_and_tracks() {
    let sites: Vec<Site> = (1..=3)
        .map(|i| Site::new(i, format!("https://s{i}.invalid")))
        .collect();
    let gateway = gateway_with(test_config(), sites);
    let state = gateway.state();

    let response = gateway
        .build_router()
        .oneshot(request(&format!("/trigger?token={TOKEN}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 3);
    assert!(body["message"].as_str().unwrap().contains("Queued 3 sites"));

    // Lock released after the dispatch section.
    assert!(!state.lock.is_locked().await.unwrap());

    // Run tracking covers exactly this batch size. The queue workers may
    // already have processed (and even finalized) the batch, so accept
    // either a live run expecting 3 or a finalized run of 3.
    match state.tracker.current().await.unwrap() {
        Some(run) => assert_eq!(run.expected, 3),
        None => {
            let stats = state.stats.read().await.unwrap();
            assert_eq!(stats.sites_processed_last_run, 3);
        }
    }
}

#[tokio::test]
async fn test_empty_directory_reports_failure_with_200() {
    let gateway = gateway_with(test_config(), vec![]);

    let response = gateway
        .build_router()
        .oneshot(request(&format!("/trigger?token={TOKEN}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_ineligible_sites_are_not_dispatched() {
    let mut archived = Site::new(2, "https://two.invalid");
    archived.archived = true;
    let sites = vec![Site::new(1, "https://one.invalid"), archived];
    let gateway = gateway_with(test_config(), sites);

    let response = gateway
        .build_router()
        .oneshot(request(&format!("/trigger?token={TOKEN}")))
        .await
        .unwrap();

    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_immediate_mode_runs_inline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/cron/run"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let sites = vec![Site::new(1, server.uri()), Site::new(2, server.uri())];
    let gateway = gateway_with(test_config(), sites);
    let state = gateway.state();

    let response = gateway
        .build_router()
        .oneshot(request(&format!("/trigger?token={TOKEN}&immediate=1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["count"], 2);

    // Immediate mode folds straight into network stats, no run state.
    let stats = state.stats.read().await.unwrap();
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.sites_processed_last_run, 2);
    assert!(state.tracker.current().await.unwrap().is_none());
}

// ============================================================================
// Output format tests
// ============================================================================

#[tokio::test]
async fn test_ga_mode_success_notice() {
    let sites = vec![Site::new(1, "https://one.invalid")];
    let gateway = gateway_with(test_config(), sites);

    let response = gateway
        .build_router()
        .oneshot(request(&format!("/trigger?token={TOKEN}&ga=1")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = text_body(response).await;
    assert!(body.starts_with("::notice::Queued 1 sites"), "got: {body}");
}

#[tokio::test]
async fn test_ga_mode_error_line_on_denial() {
    let gateway = gateway_with(test_config(), vec![]);

    let response = gateway
        .build_router()
        .oneshot(request("/trigger?ga=1"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = text_body(response).await;
    assert!(body.starts_with("::error::"), "got: {body}");
}

// ============================================================================
// Introspection tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let gateway = gateway_with(test_config(), vec![]);

    let response = gateway.build_router().oneshot(request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["cache_reachable"], true);
}

#[tokio::test]
async fn test_status_endpoint_reflects_lock_and_token() {
    let gateway = gateway_with(test_config(), vec![]);
    let state = gateway.state();
    state
        .lock
        .acquire(Duration::from_secs(300), Duration::from_secs(0))
        .await
        .unwrap();

    let response = gateway.build_router().oneshot(request("/status")).await.unwrap();

    let body = json_body(response).await;
    assert_eq!(body["data"]["locked"], true);
    assert_eq!(body["data"]["token_configured"], true);
    assert!(body["data"]["lock"]["host"].is_string());
}

#[tokio::test]
async fn test_stats_endpoint_defaults() {
    let gateway = gateway_with(test_config(), vec![]);

    let response = gateway.build_router().oneshot(request("/stats")).await.unwrap();

    let body = json_body(response).await;
    assert_eq!(body["data"]["network"]["total_runs"], 0);
    assert_eq!(body["data"]["today"]["completed"], 0);
}
