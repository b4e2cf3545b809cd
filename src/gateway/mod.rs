//! Trigger gateway server
//!
//! Composition root for the coordinator: one [`AppState`] context object
//! holds the shared cache, rate limiter, authenticator, execution lock,
//! dispatcher and stats handles, constructed once per process and cloned
//! into every handler. No hidden singletons.

pub mod response;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::{Cache, CacheBackend};
use crate::config::Config;
use crate::dispatch::{Dispatcher, ImmediateRunner, RunTracker, SiteTask, StatsAggregator};
use crate::lock::ExecutionLock;
use crate::queue::{JobQueue, LocalJobQueue};
use crate::registry::{CachedDirectory, SiteDirectory};
use crate::security::{RateLimiter, TokenAuthenticator, TokenStore};

pub use routes::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration
    pub config: Arc<Config>,

    /// Shared cache handle
    pub cache: Cache,

    /// Sliding-window rate limiter
    pub rate_limiter: RateLimiter,

    /// Token authenticator
    pub authenticator: TokenAuthenticator,

    /// Execution lock
    pub lock: ExecutionLock,

    /// Cached site directory
    pub directory: Arc<CachedDirectory>,

    /// Queued dispatcher
    pub dispatcher: Arc<Dispatcher>,

    /// Synchronous legacy runner
    pub immediate: Arc<ImmediateRunner>,

    /// Job queue handle
    pub queue: Arc<dyn JobQueue>,

    /// Run tracker
    pub tracker: RunTracker,

    /// Stats aggregator
    pub stats: StatsAggregator,

    /// Server start time
    pub start_time: Instant,
}

// ============================================================================
// Gateway Server
// ============================================================================

/// Main gateway server
pub struct Gateway {
    config: Config,
    state: AppState,
    // Kept alive for the lifetime of the server; dropping it stops the
    // worker loop.
    _local_queue: Arc<LocalJobQueue>,
}

impl Gateway {
    /// Wire up the full coordinator over a cache backend and site directory,
    /// using the in-process job queue
    pub fn new(
        config: Config,
        backend: Arc<dyn CacheBackend>,
        site_directory: Arc<dyn SiteDirectory>,
    ) -> Result<Self, ServerError> {
        config.validate().map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let cache = Cache::new(backend, config.cache.key_prefix.clone());
        let stats = StatsAggregator::new(cache.clone());
        let tracker = RunTracker::new(cache.clone(), stats.clone());

        let task = Arc::new(
            SiteTask::new(config.site.clone(), tracker.clone(), stats.clone())
                .map_err(|e| ServerError::InitError(e.to_string()))?,
        );

        let local_queue = Arc::new(LocalJobQueue::start(task.clone(), config.queue.clone()));
        let queue: Arc<dyn JobQueue> = local_queue.clone();

        let directory = Arc::new(CachedDirectory::new(
            site_directory,
            cache.clone(),
            config.directory.cache_ttl(),
            config.directory.max_sites,
        ));

        let state = AppState {
            config: Arc::new(config.clone()),
            cache: cache.clone(),
            rate_limiter: RateLimiter::new(cache.clone()),
            authenticator: TokenAuthenticator::new(
                config.token.clone(),
                TokenStore::new(cache.clone()),
            ),
            lock: ExecutionLock::new(cache.clone()),
            directory: directory.clone(),
            dispatcher: Arc::new(Dispatcher::new(directory.clone(), queue.clone(), tracker.clone())),
            immediate: Arc::new(ImmediateRunner::new(directory, task, stats.clone())),
            queue,
            tracker,
            stats,
            start_time: Instant::now(),
        };

        Ok(Self {
            config,
            state,
            _local_queue: local_queue,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.gateway.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.gateway.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start the server
    pub async fn serve(&self) -> Result<(), ServerError> {
        let addr = self.config.gateway.bind_address;
        let router = self.build_router();

        tracing::info!("Starting fleetcron gateway on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .map_err(|e| ServerError::ServeError(e.to_string()))?;

        Ok(())
    }

    /// Start with graceful shutdown
    pub async fn serve_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let addr = self.config.gateway.bind_address;
        let router = self.build_router();

        tracing::info!("Starting fleetcron gateway on {} (with graceful shutdown)", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| ServerError::ServeError(e.to_string()))?;

        tracing::info!("Gateway shutdown complete");
        Ok(())
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::registry::{Site, StaticDirectory};

    fn gateway() -> Gateway {
        let sites = vec![Site::new(1, "https://one.example.org")];
        Gateway::new(
            Config::default(),
            Arc::new(MemoryBackend::new()),
            Arc::new(StaticDirectory::new(sites)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_gateway_creation() {
        let gateway = gateway();
        let state = gateway.state();

        assert!(!state.lock.is_locked().await.unwrap());
        assert_eq!(state.stats.read().await.unwrap().total_runs, 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.queue.concurrency = 0;

        let result = Gateway::new(
            config,
            Arc::new(MemoryBackend::new()),
            Arc::new(StaticDirectory::new(vec![])),
        );

        assert!(matches!(result, Err(ServerError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_router_builds() {
        let _router = gateway().build_router();
    }
}
