//! Endpoint token authentication and administration
//!
//! Verification fails closed: with no secret configured the endpoint is
//! disabled rather than open. The secret resolves through a precedence chain
//! so containerized deployments, config files and runtime administration all
//! work:
//! 1. `FLEETCRON_TOKEN` environment variable
//! 2. static configuration (`token` in the config file)
//! 3. token stored in the shared cache via [`TokenStore`]
//!
//! Only verification lives on the request path. Issuance (generate/set/
//! delete) is an explicit admin operation on the store.

use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::cache::{Cache, CacheError};

/// Minimum accepted token length
pub const MIN_TOKEN_LEN: usize = 16;

/// Environment variable consulted first during resolution
pub const TOKEN_ENV_VAR: &str = "FLEETCRON_TOKEN";

/// Cache key holding the stored token (no expiry)
const TOKEN_KEY: &str = "token";

/// Random bytes in a generated token (hex-encoded, so 64 chars)
const GENERATED_TOKEN_BYTES: usize = 32;

/// Token administration errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// Operator-supplied token below the minimum length
    #[error("token must be at least {MIN_TOKEN_LEN} characters")]
    TokenTooShort,

    /// Shared cache failure while reading or writing the stored token
    #[error("token store error: {0}")]
    Store(#[from] CacheError),
}

// ============================================================================
// Token store (admin surface)
// ============================================================================

/// Persisted endpoint token management
#[derive(Clone)]
pub struct TokenStore {
    cache: Cache,
}

impl TokenStore {
    /// Create a store over the shared cache
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Read the stored token, if any
    pub async fn get(&self) -> Result<Option<String>, AuthError> {
        Ok(self.cache.get(TOKEN_KEY).await?)
    }

    /// Store an operator-supplied token (minimum 16 characters)
    pub async fn set(&self, token: &str) -> Result<(), AuthError> {
        if token.len() < MIN_TOKEN_LEN {
            return Err(AuthError::TokenTooShort);
        }
        self.cache.set(TOKEN_KEY, &token, None).await?;
        Ok(())
    }

    /// Delete the stored token; returns whether one existed
    pub async fn delete(&self) -> Result<bool, AuthError> {
        Ok(self.cache.delete(TOKEN_KEY).await?)
    }

    /// Generate, store and return a fresh random token
    pub async fn generate(&self) -> Result<String, AuthError> {
        let token = generate_token();
        self.cache.set(TOKEN_KEY, &token, None).await?;
        Ok(token)
    }
}

/// Generate a secure random token: 32 random bytes, hex encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; GENERATED_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ============================================================================
// Authenticator (request path)
// ============================================================================

/// Fail-closed verifier for caller-supplied tokens
#[derive(Clone)]
pub struct TokenAuthenticator {
    configured: Option<String>,
    store: TokenStore,
}

impl TokenAuthenticator {
    /// Create an authenticator with an optional statically configured secret
    pub fn new(configured: Option<String>, store: TokenStore) -> Self {
        Self {
            configured: configured.filter(|t| !t.is_empty()),
            store,
        }
    }

    /// Resolve the active secret: environment > static config > stored
    pub async fn resolve_secret(&self) -> Result<Option<String>, AuthError> {
        if let Ok(token) = std::env::var(TOKEN_ENV_VAR) {
            if !token.is_empty() {
                return Ok(Some(token));
            }
        }

        if let Some(token) = &self.configured {
            return Ok(Some(token.clone()));
        }

        self.store.get().await
    }

    /// Verify a caller-supplied token
    ///
    /// Returns `false` when no secret is configured, when no token was
    /// provided, or when the tokens differ. Cache failures also deny.
    pub async fn verify(&self, provided: Option<&str>) -> bool {
        let secret = match self.resolve_secret().await {
            Ok(Some(secret)) if !secret.is_empty() => secret,
            Ok(_) => return false,
            Err(e) => {
                tracing::error!(error = %e, "Token resolution failed, denying request");
                return false;
            }
        };

        let Some(provided) = provided.filter(|t| !t.is_empty()) else {
            return false;
        };

        digest_eq(&secret, provided)
    }

    /// Whether a usable secret is configured (present and long enough)
    pub async fn is_configured(&self) -> bool {
        matches!(
            self.resolve_secret().await,
            Ok(Some(secret)) if secret.len() >= MIN_TOKEN_LEN
        )
    }
}

/// Compare two strings by their SHA-256 digests
///
/// Equality runs on fixed-length digests, so comparison time is independent
/// of where the provided token diverges from the secret.
fn digest_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da == db
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use serial_test::serial;
    use std::sync::Arc;

    fn store() -> TokenStore {
        TokenStore::new(Cache::new(Arc::new(MemoryBackend::new()), "test"))
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_token(), token);
    }

    #[test]
    fn test_digest_eq() {
        assert!(digest_eq("secret-token-abcdef", "secret-token-abcdef"));
        assert!(!digest_eq("secret-token-abcdef", "secret-token-abcdeg"));
        assert!(!digest_eq("secret-token-abcdef", "short"));
        assert!(!digest_eq("", "anything"));
    }

    #[tokio::test]
    async fn test_store_roundtrip() {
        let store = store();

        assert!(store.get().await.unwrap().is_none());
        store.set("a-long-enough-token").await.unwrap();
        assert_eq!(store.get().await.unwrap().as_deref(), Some("a-long-enough-token"));
        assert!(store.delete().await.unwrap());
        assert!(store.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_rejects_short_token() {
        let store = store();
        let err = store.set("short").await.unwrap_err();
        assert!(matches!(err, AuthError::TokenTooShort));
    }

    #[tokio::test]
    async fn test_generate_persists() {
        let store = store();
        let token = store.generate().await.unwrap();
        assert_eq!(store.get().await.unwrap(), Some(token));
    }

    #[tokio::test]
    #[serial]
    async fn test_verify_fails_closed_without_secret() {
        std::env::remove_var(TOKEN_ENV_VAR);
        let auth = TokenAuthenticator::new(None, store());

        assert!(!auth.verify(Some("anything")).await);
        assert!(!auth.verify(None).await);
        assert!(!auth.is_configured().await);
    }

    #[tokio::test]
    #[serial]
    async fn test_verify_against_configured_secret() {
        std::env::remove_var(TOKEN_ENV_VAR);
        let auth = TokenAuthenticator::new(Some("configured-secret-1".to_string()), store());

        assert!(auth.verify(Some("configured-secret-1")).await);
        assert!(!auth.verify(Some("configured-secret-2")).await);
        assert!(!auth.verify(Some("")).await);
        assert!(!auth.verify(None).await);
    }

    #[tokio::test]
    #[serial]
    async fn test_verify_against_stored_secret() {
        std::env::remove_var(TOKEN_ENV_VAR);
        let store = store();
        store.set("stored-secret-value").await.unwrap();
        let auth = TokenAuthenticator::new(None, store);

        assert!(auth.verify(Some("stored-secret-value")).await);
        assert!(auth.is_configured().await);
    }

    #[tokio::test]
    #[serial]
    async fn test_env_takes_precedence() {
        let store = store();
        store.set("stored-secret-value").await.unwrap();
        let auth = TokenAuthenticator::new(Some("configured-secret-1".to_string()), store);

        std::env::set_var(TOKEN_ENV_VAR, "env-secret-value-xyz");

        assert!(auth.verify(Some("env-secret-value-xyz")).await);
        assert!(!auth.verify(Some("configured-secret-1")).await);
        assert!(!auth.verify(Some("stored-secret-value")).await);

        std::env::remove_var(TOKEN_ENV_VAR);
    }
}
