//! fleetcron - Fleet-wide cron coordinator
//!
//! A coordination and dispatch service that triggers each registered site's
//! scheduled-task runner across a fleet, behind a rate-limited,
//! token-authenticated HTTP endpoint, with network-wide mutual exclusion and
//! per-run completion tracking. All coordination state lives in a shared
//! TTL-based cache, so any number of coordinator instances can serve the
//! endpoint without a database.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`cache`] - Shared TTL key/value store (Redis or in-memory)
//! - [`security`] - Rate limiting, token authentication, client identity
//! - [`lock`] - Network-wide execution lock with lease expiry
//! - [`registry`] - Site directory boundary and its cached wrapper
//! - [`queue`] - Job queue boundary and the in-process worker pool
//! - [`dispatch`] - Batch fan-out, per-site tasks, run tracking, stats
//! - [`gateway`] - The HTTP trigger endpoint and introspection API
//! - [`config`] - Configuration management and settings
//!
//! # Example
//!
//! ```no_run
//! use fleetcron::cache::MemoryBackend;
//! use fleetcron::config::Config;
//! use fleetcron::gateway::Gateway;
//! use fleetcron::registry::{Site, StaticDirectory};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let sites = vec![Site::new(1, "https://one.example.org")];
//!     let gateway = Gateway::new(
//!         config,
//!         Arc::new(MemoryBackend::new()),
//!         Arc::new(StaticDirectory::new(sites)),
//!     )?;
//!     gateway.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod security;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::{Cache, CacheBackend, MemoryBackend, RedisBackend};
    pub use crate::config::Config;
    pub use crate::dispatch::{DispatchReport, NetworkStats, RunState, TaskOutcome};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::gateway::{AppState, Gateway};
    pub use crate::registry::{Site, SiteDirectory, StaticDirectory};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
