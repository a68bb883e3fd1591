//! Registrable-domain lookup backed by the public suffix list
//!
//! The list is downloaded on first use, cached on disk and kept in memory.
//! A cached copy older than [`PSL_MAX_AGE`] is refreshed on the next lookup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use publicsuffix::{List, Psl};
use thiserror::Error;

/// Upstream location of the public suffix list
pub const PSL_URL: &str = "https://publicsuffix.org/list/public_suffix_list.dat";

/// How long a downloaded list stays valid
pub const PSL_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors from registrable-domain lookups
#[derive(Debug, Error)]
pub enum PslError {
    #[error("Failed to download public suffix list from {url}: {message}")]
    Download { url: String, message: String },

    #[error("Failed to access suffix list cache {path:?}: {source}")]
    Cache {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse public suffix list: {0}")]
    Parse(String),

    #[error("\"{0}\" has no registrable domain")]
    NoRegistrableDomain(String),
}

/// Maps a hostname to the domain under which its records are managed
pub trait SuffixResolver: Send + Sync {
    /// Return the registrable domain of `fqdn` (e.g. `example.co.uk` for `www.example.co.uk`)
    fn registrable_domain(&self, fqdn: &str) -> Result<String, PslError>;
}

struct CachedList {
    list: List,
    fetched_at: DateTime<Utc>,
}

/// Public suffix list resolver with an explicit on-disk and in-memory cache
pub struct PublicSuffixResolver {
    url: String,
    cache_path: PathBuf,
    max_age: Duration,
    cache: Mutex<Option<CachedList>>,
}

impl PublicSuffixResolver {
    /// Create a resolver that caches the list at `cache_path`
    pub fn new(cache_path: impl Into<PathBuf>) -> Self {
        Self::with_source(PSL_URL, cache_path)
    }

    /// Create a resolver that downloads the list from a custom URL
    pub fn with_source(url: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            cache_path: cache_path.into(),
            max_age: PSL_MAX_AGE,
            cache: Mutex::new(None),
        }
    }

    /// Path of the on-disk cache
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Drop the on-disk and in-memory copies so the next lookup downloads again
    pub fn clear_cache(&self) -> Result<(), PslError> {
        *self.cache.lock() = None;
        match std::fs::remove_file(&self.cache_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PslError::Cache {
                path: self.cache_path.clone(),
                source,
            }),
        }
    }

    fn is_stale(&self, fetched_at: DateTime<Utc>) -> bool {
        // A timestamp in the future counts as fresh
        (Utc::now() - fetched_at)
            .to_std()
            .map(|age| age > self.max_age)
            .unwrap_or(false)
    }

    fn load(&self) -> Result<CachedList, PslError> {
        if let Some(cached) = self.load_from_disk()? {
            return Ok(cached);
        }

        tracing::info!(url = %self.url, "Downloading public suffix list");
        let data = ureq::get(self.url.as_str())
            .call()
            .and_then(|mut response| response.body_mut().read_to_string())
            .map_err(|e| PslError::Download {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let list = parse_list(&data)?;

        if let Some(parent) = self.cache_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| PslError::Cache {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.cache_path, &data).map_err(|source| PslError::Cache {
            path: self.cache_path.clone(),
            source,
        })?;

        Ok(CachedList {
            list,
            fetched_at: Utc::now(),
        })
    }

    fn load_from_disk(&self) -> Result<Option<CachedList>, PslError> {
        let modified = match std::fs::metadata(&self.cache_path).and_then(|m| m.modified()) {
            Ok(modified) => DateTime::<Utc>::from(modified),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PslError::Cache {
                    path: self.cache_path.clone(),
                    source,
                })
            }
        };

        if self.is_stale(modified) {
            tracing::debug!(path = ?self.cache_path, "Cached suffix list is stale");
            return Ok(None);
        }

        let data = std::fs::read_to_string(&self.cache_path).map_err(|source| PslError::Cache {
            path: self.cache_path.clone(),
            source,
        })?;
        tracing::debug!(path = ?self.cache_path, "Using cached suffix list");

        Ok(Some(CachedList {
            list: parse_list(&data)?,
            fetched_at: modified,
        }))
    }
}

impl SuffixResolver for PublicSuffixResolver {
    fn registrable_domain(&self, fqdn: &str) -> Result<String, PslError> {
        let mut cache = self.cache.lock();

        let fresh = matches!(&*cache, Some(cached) if !self.is_stale(cached.fetched_at));
        if !fresh {
            *cache = Some(self.load()?);
        }

        let cached = cache
            .as_ref()
            .ok_or_else(|| PslError::Parse("suffix list unavailable".to_string()))?;

        let domain = cached
            .list
            .domain(fqdn.as_bytes())
            .ok_or_else(|| PslError::NoRegistrableDomain(fqdn.to_string()))?;

        std::str::from_utf8(domain.as_bytes())
            .map(str::to_string)
            .map_err(|e| PslError::Parse(e.to_string()))
    }
}

fn parse_list(data: &str) -> Result<List, PslError> {
    data.parse::<List>()
        .map_err(|e| PslError::Parse(e.to_string()))
}

/// Resolver over a fixed set of suffixes, for offline use and tests
///
/// The longest listed suffix wins; a name with no listed suffix falls back to
/// treating its last label as the suffix.
#[derive(Debug, Clone, Default)]
pub struct StaticSuffixResolver {
    suffixes: Vec<String>,
}

impl StaticSuffixResolver {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.into().to_ascii_lowercase())
                .collect(),
        }
    }
}

impl SuffixResolver for StaticSuffixResolver {
    fn registrable_domain(&self, fqdn: &str) -> Result<String, PslError> {
        let labels: Vec<&str> = fqdn.split('.').collect();

        for i in 0..labels.len() {
            let candidate = labels[i..].join(".");
            if self.suffixes.iter().any(|s| *s == candidate) {
                return match i {
                    0 => Err(PslError::NoRegistrableDomain(fqdn.to_string())),
                    _ => Ok(labels[i - 1..].join(".")),
                };
            }
        }

        if labels.len() < 2 {
            return Err(PslError::NoRegistrableDomain(fqdn.to_string()));
        }
        Ok(labels[labels.len() - 2..].join("."))
    }
}
