//! Package index clients.
//!
//! The dependency manager only needs one thing from a package index: the
//! versions published for a name. [`PackageIndex`] captures that, with a
//! remote JSON backend, a local file backend for offline use, and an
//! in-memory backend for tests and fixtures.

mod http;
mod local;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use semver::Version;
use thiserror::Error;
use url::Url;

pub use http::HttpPackageIndex;
pub use local::LocalPackageIndex;

use crate::version::parse_lenient;

/// Errors returned by a package index lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// Network failure, timeout, or an unreadable index file. Worth retrying.
    #[error("package index unavailable while looking up '{name}': {reason}")]
    Unavailable { name: String, reason: String },

    /// The index answered, and it does not know this name.
    #[error("package '{name}' not found in index")]
    NotFound { name: String },
}

impl IndexError {
    pub fn unavailable(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::Unavailable {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// The client for a configured index could not be created.
#[derive(Debug, Clone, Error)]
#[error("cannot create package index client for '{index}': {reason}")]
pub struct ConnectError {
    pub index: String,
    pub reason: String,
}

impl ConnectError {
    pub fn new(index: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            index: index.into(),
            reason: reason.to_string(),
        }
    }
}

/// Source of published package versions.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Versions published for `name`, highest precedence first, deduplicated.
    async fn lookup(&self, name: &str) -> Result<Vec<Version>, IndexError>;

    /// Human-readable description of where versions come from.
    fn source(&self) -> String;
}

/// Sort versions by descending precedence and drop duplicates.
pub fn sort_descending(mut versions: Vec<Version>) -> Vec<Version> {
    versions.sort_by(|a, b| b.cmp(a));
    versions.dedup();
    versions
}

/// Parse raw listings, skipping anything that is not a usable version.
pub(crate) fn parse_listing<'a>(name: &str, raw: impl IntoIterator<Item = &'a str>) -> Vec<Version> {
    let versions = raw
        .into_iter()
        .filter_map(|s| {
            let parsed = parse_lenient(s);
            if parsed.is_none() {
                tracing::debug!(package = %name, version = %s, "skipping non-semver listing");
            }
            parsed
        })
        .collect();
    sort_descending(versions)
}

/// Where the package index lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSource {
    Remote(Url),
    Local(PathBuf),
}

impl IndexSource {
    /// `http://` and `https://` values are remote; anything else is a path.
    pub fn parse(value: &str) -> Self {
        let trimmed = value.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            if let Ok(url) = Url::parse(trimmed) {
                return Self::Remote(url);
            }
        }
        Self::Local(PathBuf::from(trimmed))
    }
}

impl fmt::Display for IndexSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(url) => write!(f, "{url}"),
            Self::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Build the index client for a configured source.
pub fn connect(source: &IndexSource, timeout: Duration) -> Result<Arc<dyn PackageIndex>, ConnectError> {
    Ok(match source {
        IndexSource::Remote(url) => Arc::new(HttpPackageIndex::new(url.clone(), timeout)?),
        IndexSource::Local(path) => Arc::new(LocalPackageIndex::new(path.clone())),
    })
}

/// In-memory index.
///
/// Packages can be published and withdrawn while the index is in use, which
/// makes it the base for offline fixtures.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    packages: RwLock<HashMap<String, Vec<Version>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`publish`](Self::publish).
    pub fn with_package(self, name: &str, versions: &[&str]) -> Self {
        self.publish(name, versions);
        self
    }

    /// Replace the published versions of `name`.
    pub fn publish(&self, name: &str, versions: &[&str]) {
        let parsed = parse_listing(name, versions.iter().copied());
        self.packages.write().insert(name.to_string(), parsed);
    }

    /// Remove `name` from the index entirely.
    pub fn withdraw(&self, name: &str) {
        self.packages.write().remove(name);
    }
}

#[async_trait]
impl PackageIndex for MemoryIndex {
    async fn lookup(&self, name: &str) -> Result<Vec<Version>, IndexError> {
        self.packages
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::not_found(name))
    }

    fn source(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn source_parse_distinguishes_urls_and_paths() {
        assert!(matches!(
            IndexSource::parse("https://pypi.org/pypi"),
            IndexSource::Remote(_)
        ));
        assert_eq!(
            IndexSource::parse("./fixtures/index.toml"),
            IndexSource::Local(PathBuf::from("./fixtures/index.toml"))
        );
    }

    #[test]
    fn connect_builds_a_client_per_source() {
        let remote = connect(&IndexSource::parse("https://pypi.org/pypi"), Duration::from_secs(1)).unwrap();
        assert_eq!(remote.source(), "https://pypi.org/pypi/");

        let local = connect(&IndexSource::parse("./index.toml"), Duration::from_secs(1)).unwrap();
        assert!(local.source().contains("index.toml"));

        let err = ConnectError::new("https://pypi.org/pypi/", "no TLS backend");
        assert!(err.to_string().contains("no TLS backend"));
    }

    #[test]
    fn listing_is_sorted_and_filtered() {
        let versions = parse_listing("pyarrow", ["10.0", "14.0.1", "1.0rc1", "14.0.1", "9.0.0"]);
        let rendered: Vec<_> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["14.0.1", "10.0.0", "9.0.0"]);
    }

    #[tokio::test]
    async fn memory_index_lookup_and_withdraw() {
        let index = MemoryIndex::new().with_package("delta-spark", &["1.9.0", "2.4.0"]);

        let versions = index.lookup("delta-spark").await.unwrap();
        assert_eq!(versions[0], Version::new(2, 4, 0));

        index.withdraw("delta-spark");
        assert_eq!(
            index.lookup("delta-spark").await,
            Err(IndexError::not_found("delta-spark"))
        );
    }

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(IndexError::unavailable("x", "timeout").is_retryable());
        assert!(!IndexError::not_found("x").is_retryable());
    }
}
