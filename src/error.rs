//! Unified error handling for the fleetcron crate
//!
//! Domain modules define their own error enums; this module consolidates
//! them into a single [`Error`] for use across module boundaries, together
//! with a classification used for logging and handling strategies.

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::cache::CacheError;
pub use crate::config::ConfigError;
pub use crate::dispatch::{DispatchError, TaskError, TrackerError};
pub use crate::lock::LockError;
pub use crate::queue::QueueError;
pub use crate::registry::DirectoryError;
pub use crate::security::AuthError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-level failures (HTTP to sites)
    Network,
    /// Shared cache failures
    Cache,
    /// Configuration and validation problems
    Config,
    /// Site directory failures
    Directory,
    /// Job queue failures
    Queue,
    /// Security layer failures (token store)
    Security,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Stable label for logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cache => "cache",
            Self::Config => "config",
            Self::Directory => "directory",
            Self::Queue => "queue",
            Self::Security => "security",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the fleetcron crate
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Shared cache errors
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Token store / authentication administration errors
    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    /// Execution lock errors
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// Site directory errors
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Job queue errors
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Dispatch errors
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Run tracking errors
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Site task errors
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other(context.into())
    }

    /// Classify this error for handling strategies
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Config,
            Self::Cache(_) | Self::Lock(_) | Self::Tracker(_) => ErrorCategory::Cache,
            Self::Auth(_) => ErrorCategory::Security,
            Self::Directory(_) => ErrorCategory::Directory,
            Self::Queue(_) => ErrorCategory::Queue,
            Self::Dispatch(e) => match e {
                DispatchError::Directory(_) => ErrorCategory::Directory,
                DispatchError::Tracker(_) => ErrorCategory::Cache,
            },
            Self::Task(_) | Self::Http(_) => ErrorCategory::Network,
            Self::Io(_) | Self::Other(_) => ErrorCategory::Other,
        }
    }

    /// Whether retrying the operation can plausibly succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Cache | ErrorCategory::Queue
        )
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
