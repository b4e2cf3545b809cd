//! Endpoint security: client identity, rate limiting, token authentication
//!
//! Every inbound trigger request passes through this module twice: once to
//! check the sliding-window rate limit for the caller's identity, and once to
//! verify the shared-secret token. Both checks fail closed.

pub mod client_key;
pub mod rate_limit;
pub mod token;

pub use client_key::client_key;
pub use rate_limit::RateLimiter;
pub use token::{AuthError, TokenAuthenticator, TokenStore, MIN_TOKEN_LEN};

/// Security-relevant transitions worth a structured log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Rate limit rejected the caller
    RateLimitExceeded,

    /// Token missing, invalid, or no token configured
    AuthenticationFailed,

    /// Valid token presented
    AuthenticationSuccess,

    /// Execution lock was held or the last run was too recent
    ConcurrentExecution,

    /// Trigger accepted and executed
    SuccessfulExecution,
}

impl SecurityEvent {
    fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::AuthenticationSuccess => "AUTHENTICATION_SUCCESS",
            Self::ConcurrentExecution => "CONCURRENT_EXECUTION",
            Self::SuccessfulExecution => "SUCCESSFUL_EXECUTION",
        }
    }
}

/// Log a security event with the client identity attached
pub fn log_security_event(event: SecurityEvent, client: &str, detail: &str) {
    match event {
        SecurityEvent::AuthenticationSuccess | SecurityEvent::SuccessfulExecution => {
            tracing::info!(event = event.as_str(), client = %client, "{detail}");
        }
        _ => {
            tracing::warn!(event = event.as_str(), client = %client, "{detail}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_labels() {
        assert_eq!(SecurityEvent::RateLimitExceeded.as_str(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(SecurityEvent::ConcurrentExecution.as_str(), "CONCURRENT_EXECUTION");
    }
}
