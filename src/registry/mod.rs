//! Site directory boundary and its TTL-bounded cache
//!
//! The directory of registered sites is an external collaborator; this module
//! defines the typed boundary ([`Site`], [`SiteDirectory`]) and a thin cached
//! wrapper so a dispatch does not hit the directory on every trigger. The
//! cached list is never served past its TTL and can be invalidated
//! explicitly (deactivation, uninstall).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cache::{Cache, CacheError};

const SITES_KEY: &str = "sites";

/// Cache key used by pre-0.2 releases; removed on the first miss after an
/// upgrade so stale lists from the old format cannot linger
const LEGACY_SITES_KEY: &str = "site_list";

/// Directory errors
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Directory service unreachable or returned an error
    #[error("site directory unavailable: {0}")]
    Unavailable(String),

    /// A site record failed validation
    #[error("invalid site record: {0}")]
    InvalidSite(String),

    /// Shared cache failure
    #[error("site cache error: {0}")]
    Cache(#[from] CacheError),
}

// ============================================================================
// Site model
// ============================================================================

/// One registered site whose maintenance endpoint can be triggered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    /// Site identifier in the directory
    pub id: u64,

    /// Base URL of the site (scheme + host, optionally a path prefix)
    pub base_url: String,

    /// Site is publicly active
    #[serde(default = "default_true")]
    pub public: bool,

    /// Site has been archived
    #[serde(default)]
    pub archived: bool,

    /// Site has been deleted
    #[serde(default)]
    pub deleted: bool,

    /// Site is flagged as spam
    #[serde(default)]
    pub spam: bool,
}

fn default_true() -> bool {
    true
}

impl Site {
    /// Create a plain active site
    pub fn new(id: u64, base_url: impl Into<String>) -> Self {
        Self {
            id,
            base_url: base_url.into(),
            public: true,
            archived: false,
            deleted: false,
            spam: false,
        }
    }

    /// Whether this site should receive maintenance triggers
    pub fn is_eligible(&self) -> bool {
        self.public && !self.archived && !self.deleted && !self.spam
    }

    /// Validate the record shape (non-empty, parseable base URL)
    pub fn validate(&self) -> Result<(), DirectoryError> {
        if self.base_url.is_empty() {
            return Err(DirectoryError::InvalidSite(format!(
                "site {} has no base URL",
                self.id
            )));
        }
        Url::parse(&self.base_url).map_err(|e| {
            DirectoryError::InvalidSite(format!("site {}: {e}: {}", self.id, self.base_url))
        })?;
        Ok(())
    }
}

// ============================================================================
// Directory boundary
// ============================================================================

/// External directory of registered sites
#[async_trait]
pub trait SiteDirectory: Send + Sync {
    /// List up to `limit` site records (eligibility not yet applied)
    async fn list_sites(&self, limit: usize) -> Result<Vec<Site>, DirectoryError>;
}

/// Directory backed by a fixed list, typically loaded from configuration
pub struct StaticDirectory {
    sites: Vec<Site>,
}

impl StaticDirectory {
    /// Create a directory over a fixed site list
    pub fn new(sites: Vec<Site>) -> Self {
        Self { sites }
    }

    /// Load a site list from a TOML file with `[[sites]]` entries
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, DirectoryError> {
        #[derive(Deserialize)]
        struct SitesFile {
            #[serde(default)]
            sites: Vec<Site>,
        }

        let text = std::fs::read_to_string(&path)
            .map_err(|e| DirectoryError::Unavailable(format!("failed to read site list: {e}")))?;
        let file: SitesFile = toml::from_str(&text)
            .map_err(|e| DirectoryError::Unavailable(format!("failed to parse site list: {e}")))?;

        Ok(Self::new(file.sites))
    }
}

#[async_trait]
impl SiteDirectory for StaticDirectory {
    async fn list_sites(&self, limit: usize) -> Result<Vec<Site>, DirectoryError> {
        Ok(self.sites.iter().take(limit).cloned().collect())
    }
}

// ============================================================================
// Cached wrapper
// ============================================================================

/// Stored form of a fetched site list
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSiteList {
    sites: Vec<Site>,
    fetched_at: DateTime<Utc>,
}

/// TTL-bounded cache in front of a [`SiteDirectory`]
pub struct CachedDirectory {
    inner: Arc<dyn SiteDirectory>,
    cache: Cache,
    ttl: Duration,
    max_sites: usize,
}

impl CachedDirectory {
    /// Wrap a directory with caching
    pub fn new(inner: Arc<dyn SiteDirectory>, cache: Cache, ttl: Duration, max_sites: usize) -> Self {
        Self {
            inner,
            cache,
            ttl,
            max_sites,
        }
    }

    /// Current eligible sites, served from cache within the TTL
    ///
    /// On a miss the legacy cache key is dropped, the directory is queried,
    /// ineligible and malformed records are filtered out, and the result is
    /// stored with the configured TTL. Directory failures propagate; a run
    /// never dispatches against a partial list.
    pub async fn eligible_sites(&self) -> Result<Vec<Site>, DirectoryError> {
        if let Some(cached) = self.cache.get::<CachedSiteList>(SITES_KEY).await? {
            tracing::debug!(
                count = cached.sites.len(),
                fetched_at = %cached.fetched_at,
                "Site list cache hit"
            );
            return Ok(cached.sites);
        }

        // Miss path also migrates away from the previous cache generation.
        let _ = self.cache.delete(LEGACY_SITES_KEY).await?;

        let fetched = self.inner.list_sites(self.max_sites).await?;
        let total = fetched.len();

        let sites: Vec<Site> = fetched
            .into_iter()
            .filter(|site| {
                if !site.is_eligible() {
                    return false;
                }
                match site.validate() {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(site_id = site.id, error = %e, "Skipping invalid site record");
                        false
                    }
                }
            })
            .collect();

        tracing::info!(
            eligible = sites.len(),
            fetched = total,
            "Refreshed site list from directory"
        );

        let entry = CachedSiteList {
            sites: sites.clone(),
            fetched_at: Utc::now(),
        };
        self.cache.set(SITES_KEY, &entry, Some(self.ttl)).await?;

        Ok(sites)
    }

    /// Drop the cached list immediately
    pub async fn invalidate(&self) -> Result<bool, DirectoryError> {
        Ok(self.cache.delete(SITES_KEY).await?)
    }

    /// Age of the cached list, if one is present
    pub async fn cache_age(&self) -> Result<Option<chrono::Duration>, DirectoryError> {
        let cached: Option<CachedSiteList> = self.cache.get(SITES_KEY).await?;
        Ok(cached.map(|c| Utc::now() - c.fetched_at))
    }
}
