//! Configuration loaded from environment variables.

use std::collections::BTreeSet;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use lakebench_sdk::types::Capability;

use crate::index::IndexSource;

/// Default package index (PyPI JSON API).
pub const DEFAULT_PACKAGE_INDEX: &str = "https://pypi.org/pypi";

/// Settings for dependency validation and resolution.
#[derive(Debug, Clone)]
pub struct DependencyConfig {
    /// TTL of cached validation results (default: 1 hour).
    pub cache_ttl: Duration,

    /// TTL of cached index version lists (default: 10 minutes).
    pub index_cache_ttl: Duration,

    /// Maximum entries per cache namespace (default: 10000).
    pub cache_max_capacity: u64,

    /// Downgrade every optional-dependency failure to a warning (default: true).
    pub ignore_optional: bool,

    /// Skip TEST-scope dependencies during validation (default: false).
    pub skip_test_scope: bool,

    /// Maximum inter-plugin dependency depth during resolution (default: 3).
    pub max_depth: usize,

    /// Package index URL or local index file.
    pub package_index: IndexSource,

    /// Per-lookup timeout (default: 10 seconds).
    pub lookup_timeout: Duration,

    /// Lookup attempts before a dependency is treated as unresolved (default: 3).
    pub retry_attempts: u32,

    /// Delay before the first retry; doubled for each further retry (default: 200ms).
    pub retry_backoff: Duration,

    /// Upper bound on concurrent lookups within one validation (default: 16).
    pub max_concurrency: usize,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            index_cache_ttl: Duration::from_secs(600),
            cache_max_capacity: 10_000,
            ignore_optional: true,
            skip_test_scope: false,
            max_depth: 3,
            package_index: IndexSource::parse(DEFAULT_PACKAGE_INDEX),
            lookup_timeout: Duration::from_secs(10),
            retry_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            max_concurrency: 16,
        }
    }
}

/// Settings for the plugin registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capabilities every plugin must declare to become active (default: read, write).
    pub required_capabilities: BTreeSet<Capability>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            required_capabilities: [Capability::Read, Capability::Write].into_iter().collect(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub dependency: DependencyConfig,
    pub registry: RegistryConfig,
}

impl Config {
    /// Load configuration from `LAKEBENCH_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = DependencyConfig::default();

        let cache_ttl = Duration::from_secs(parse_var(
            &lookup,
            "LAKEBENCH_CACHE_TTL_SECS",
            defaults.cache_ttl.as_secs(),
        )?);

        let index_cache_ttl = Duration::from_secs(parse_var(
            &lookup,
            "LAKEBENCH_INDEX_CACHE_TTL_SECS",
            defaults.index_cache_ttl.as_secs(),
        )?);

        let cache_max_capacity = parse_var(
            &lookup,
            "LAKEBENCH_CACHE_MAX_CAPACITY",
            defaults.cache_max_capacity,
        )?;

        let ignore_optional =
            parse_flag(&lookup, "LAKEBENCH_IGNORE_OPTIONAL", defaults.ignore_optional)?;

        let skip_test_scope =
            parse_flag(&lookup, "LAKEBENCH_SKIP_TEST_SCOPE", defaults.skip_test_scope)?;

        let max_depth = parse_var(&lookup, "LAKEBENCH_MAX_DEPTH", defaults.max_depth)?;
        if max_depth == 0 {
            bail!("LAKEBENCH_MAX_DEPTH must be at least 1");
        }

        let package_index = lookup("LAKEBENCH_PACKAGE_INDEX")
            .map(|v| IndexSource::parse(&v))
            .unwrap_or(defaults.package_index);

        let lookup_timeout = Duration::from_secs(parse_var(
            &lookup,
            "LAKEBENCH_LOOKUP_TIMEOUT_SECS",
            defaults.lookup_timeout.as_secs(),
        )?);

        let retry_attempts =
            parse_var(&lookup, "LAKEBENCH_RETRY_ATTEMPTS", defaults.retry_attempts)?.max(1);

        let retry_backoff = Duration::from_millis(parse_var(
            &lookup,
            "LAKEBENCH_RETRY_BACKOFF_MS",
            defaults.retry_backoff.as_millis() as u64,
        )?);

        let max_concurrency =
            parse_var(&lookup, "LAKEBENCH_MAX_CONCURRENCY", defaults.max_concurrency)?.max(1);

        let required_capabilities = match lookup("LAKEBENCH_REQUIRED_CAPABILITIES") {
            Some(raw) => parse_capabilities(&raw)?,
            None => RegistryConfig::default().required_capabilities,
        };

        Ok(Self {
            dependency: DependencyConfig {
                cache_ttl,
                index_cache_ttl,
                cache_max_capacity,
                ignore_optional,
                skip_test_scope,
                max_depth,
                package_index,
                lookup_timeout,
                retry_attempts,
                retry_backoff,
                max_concurrency,
            },
            registry: RegistryConfig {
                required_capabilities,
            },
        })
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid {}", std::any::type_name::<T>())),
        None => Ok(default),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: bool) -> Result<bool> {
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("{name} must be a boolean, got '{other}'"),
    }
}

fn parse_capabilities(raw: &str) -> Result<BTreeSet<Capability>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            Capability::parse(s)
                .with_context(|| format!("LAKEBENCH_REQUIRED_CAPABILITIES: unknown capability '{s}'"))
        })
        .collect()
}
