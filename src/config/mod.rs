//! Configuration management for the fleetcron coordinator
//!
//! This module handles loading and validating configuration from environment
//! variables and an optional TOML file. Every tunable on the endpoint's
//! behavior (rate limit, lock lease, per-site timeout, worker concurrency)
//! lives here so the hosting environment can override it.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field failed validation
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file could not be parsed
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway (HTTP server) configuration
    pub gateway: GatewayConfig,

    /// Rate limiter configuration
    pub rate_limit: RateLimitConfig,

    /// Execution lock configuration
    pub lock: LockConfig,

    /// Per-site trigger configuration
    pub site: SiteTriggerConfig,

    /// Site directory configuration
    pub directory: DirectoryConfig,

    /// Job queue configuration
    pub queue: QueueConfig,

    /// Shared cache configuration
    pub cache: CacheSettings,

    /// Statically configured endpoint token (environment and stored token
    /// take part in the precedence chain; see `security::token`)
    pub token: Option<String>,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for the API
    pub enable_cors: bool,

    /// Enable per-request trace logging
    pub enable_request_logging: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".parse().expect("static addr"),
            enable_cors: false,
            enable_request_logging: true,
        }
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per client within the window
    pub max_requests: usize,

    /// Sliding window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window_secs: 300,
        }
    }
}

impl RateLimitConfig {
    /// Window as a [`Duration`]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Execution lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lease TTL in seconds; the hard upper bound on lock staleness
    pub lease_ttl_secs: u64,

    /// Minimum seconds between two successful acquisitions
    pub min_interval_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 300,
            min_interval_secs: 60,
        }
    }
}

impl LockConfig {
    /// Lease TTL as a [`Duration`]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Minimum interval as a [`Duration`]
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(self.min_interval_secs)
    }
}

/// Per-site trigger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteTriggerConfig {
    /// HTTP timeout per site request, in seconds
    pub timeout_secs: u64,

    /// Path (with query marker) appended to each site's base URL
    pub trigger_path: String,

    /// Verify TLS certificates on site requests. Off by default: registered
    /// site URLs are same-owner infrastructure, often on internal hostnames.
    pub verify_tls: bool,

    /// Emit detailed per-site request/response logs
    pub detailed_logging: bool,
}

impl Default for SiteTriggerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            trigger_path: "/cron/run?source=fleetcron".to_string(),
            verify_tls: false,
            detailed_logging: false,
        }
    }
}

impl SiteTriggerConfig {
    /// Request timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Site directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// How long the fetched site list stays cached, in seconds
    pub cache_ttl_secs: u64,

    /// Maximum number of sites fetched from the directory
    pub max_sites: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 3600,
            max_sites: 200,
        }
    }
}

impl DirectoryConfig {
    /// Cache TTL as a [`Duration`]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Concurrent site tasks (1 recommended to avoid dispatch storms)
    pub concurrency: usize,

    /// Jobs pulled per worker wakeup
    pub batch_size: usize,

    /// Attempts per job before it is marked failed (retry policy of the
    /// in-process queue; external queues apply their own)
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            batch_size: 5,
            max_attempts: 1,
        }
    }
}

/// Shared cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Redis URL (e.g. redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Key prefix for namespacing
    pub key_prefix: String,

    /// Run on the in-memory backend instead of Redis (single instance only)
    pub in_memory: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "fleetcron".to_string(),
            in_memory: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, starting from defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(addr) = env_var("FLEETCRON_BIND_ADDR") {
            config.gateway.bind_address =
                addr.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "bind_address".to_string(),
                    reason: format!("invalid socket address: {addr}"),
                })?;
        }

        config.rate_limit.max_requests =
            env_parse("FLEETCRON_RATE_LIMIT_MAX", config.rate_limit.max_requests);
        config.rate_limit.window_secs = env_parse(
            "FLEETCRON_RATE_LIMIT_WINDOW_SECS",
            config.rate_limit.window_secs,
        );

        config.lock.lease_ttl_secs =
            env_parse("FLEETCRON_LOCK_TTL_SECS", config.lock.lease_ttl_secs);
        config.lock.min_interval_secs = env_parse(
            "FLEETCRON_LOCK_MIN_INTERVAL_SECS",
            config.lock.min_interval_secs,
        );

        config.site.timeout_secs =
            env_parse("FLEETCRON_SITE_TIMEOUT_SECS", config.site.timeout_secs);
        if let Some(path) = env_var("FLEETCRON_TRIGGER_PATH") {
            config.site.trigger_path = path;
        }
        config.site.verify_tls = env_parse("FLEETCRON_VERIFY_TLS", config.site.verify_tls);
        config.site.detailed_logging =
            env_parse("FLEETCRON_DETAILED_LOGGING", config.site.detailed_logging);

        config.directory.cache_ttl_secs = env_parse(
            "FLEETCRON_SITES_CACHE_TTL_SECS",
            config.directory.cache_ttl_secs,
        );
        config.directory.max_sites = env_parse("FLEETCRON_MAX_SITES", config.directory.max_sites);

        config.queue.concurrency =
            env_parse("FLEETCRON_WORKER_CONCURRENCY", config.queue.concurrency);
        config.queue.batch_size = env_parse("FLEETCRON_BATCH_SIZE", config.queue.batch_size);
        config.queue.max_attempts =
            env_parse("FLEETCRON_MAX_ATTEMPTS", config.queue.max_attempts);

        if let Some(url) = env_var("REDIS_URL") {
            config.cache.url = url;
        }
        config.cache.pool_size = env_parse("REDIS_POOL_SIZE", config.cache.pool_size);
        if let Some(prefix) = env_var("FLEETCRON_CACHE_PREFIX") {
            config.cache.key_prefix = prefix;
        }
        config.cache.in_memory = env_parse("FLEETCRON_CACHE_IN_MEMORY", config.cache.in_memory);

        // The token env var itself is read at verification time so rotation
        // does not require a restart; a config-file token is still honored.
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file; absent sections keep defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.max_requests == 0 {
            return Err(ConfigError::InvalidValue {
                field: "rate_limit.max_requests".to_string(),
                reason: "must admit at least 1 request".to_string(),
            });
        }

        if self.lock.lease_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock.lease_ttl_secs".to_string(),
                reason: "lease must be at least 1 second".to_string(),
            });
        }

        if self.queue.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.concurrency".to_string(),
                reason: "must allow at least 1 worker".to_string(),
            });
        }

        if self.queue.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "queue.max_attempts".to_string(),
                reason: "jobs need at least 1 attempt".to_string(),
            });
        }

        if self.directory.max_sites == 0 {
            return Err(ConfigError::InvalidValue {
                field: "directory.max_sites".to_string(),
                reason: "must fetch at least 1 site".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
