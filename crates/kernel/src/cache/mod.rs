//! Validation cache.
//!
//! Two in-memory namespaces backed by Moka:
//! - validation results, keyed by the plugin's dependency fingerprint
//! - package index version lists, keyed by dependency name
//!
//! Entries carry their own TTL. Loading goes through Moka's entry API, which
//! keeps at most one resolution in flight per key; concurrent callers for the
//! same key wait on that resolution. Nothing is persisted, so a miss only
//! costs a live resolution.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lakebench_sdk::types::{PluginMetadata, ValidationResult};
use moka::Expiry;
use moka::future::Cache;
use semver::Version;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::DependencyConfig;
use crate::index::IndexError;

/// A cached value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn new(key: impl Into<String>, value: T, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: Utc::now(),
            ttl,
        }
    }
}

/// Expires each entry after its own TTL.
struct EntryExpiry;

impl<T> Expiry<String, CacheEntry<T>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry<T>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry<T>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Outcome of a live validation, before caching.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: ValidationResult,
    /// False when some dependency could not be resolved because the index
    /// was unavailable. Incomplete results are never stored.
    pub complete: bool,
}

/// Entry counts per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub validation_entries: u64,
    pub index_entries: u64,
}

/// Deterministic cache key for a plugin version and its dependency set.
///
/// SHA-256 over the id, version and every dependency spec in name order.
pub fn fingerprint(metadata: &PluginMetadata) -> String {
    let mut hasher = Sha256::new();
    hasher.update(metadata.id.as_bytes());
    hasher.update([0]);
    hasher.update(metadata.version.as_bytes());

    let mut specs: Vec<_> = metadata.dependencies.values().collect();
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    for spec in specs {
        hasher.update([0]);
        hasher.update(
            format!(
                "{}|{}|{}|{}",
                spec.name,
                spec.version_range.trim(),
                spec.kind.as_str(),
                spec.scope.as_str()
            )
            .as_bytes(),
        );
    }

    hex::encode(hasher.finalize())
}

/// Cache for validation results and index lookups.
#[derive(Clone)]
pub struct ValidationCache {
    inner: Arc<ValidationCacheInner>,
}

struct ValidationCacheInner {
    validations: Cache<String, CacheEntry<ValidationResult>>,
    index: Cache<String, CacheEntry<Arc<Vec<Version>>>>,
    validation_ttl: Duration,
    index_ttl: Duration,
    /// plugin id → (plugin version, cache key) for every stored validation.
    owners: DashMap<String, Vec<(String, String)>>,
}

impl ValidationCache {
    pub fn new(config: &DependencyConfig) -> Self {
        let validations = Cache::builder()
            .max_capacity(config.cache_max_capacity)
            .expire_after(EntryExpiry)
            .build();
        let index = Cache::builder()
            .max_capacity(config.cache_max_capacity)
            .expire_after(EntryExpiry)
            .build();

        Self {
            inner: Arc::new(ValidationCacheInner {
                validations,
                index,
                validation_ttl: config.cache_ttl,
                index_ttl: config.index_cache_ttl,
                owners: DashMap::new(),
            }),
        }
    }

    /// Look up a stored validation result.
    pub async fn get(&self, key: &str) -> Option<CacheEntry<ValidationResult>> {
        let entry = self.inner.validations.get(key).await;
        if entry.is_some() {
            debug!(key = %key, "validation cache hit");
        }
        entry
    }

    /// Store a validation result with an explicit TTL.
    pub async fn put(
        &self,
        key: &str,
        plugin_id: &str,
        version: &str,
        result: ValidationResult,
        ttl: Duration,
    ) {
        if ttl.is_zero() {
            return;
        }
        self.inner
            .validations
            .insert(key.to_string(), CacheEntry::new(key, result, ttl))
            .await;
        self.track(key, plugin_id, version).await;
    }

    /// Drop a single validation result.
    pub async fn invalidate(&self, key: &str) {
        self.inner.validations.invalidate(key).await;
        for mut owned in self.inner.owners.iter_mut() {
            owned.retain(|(_, k)| k != key);
        }
        debug!(key = %key, "validation cache entry invalidated");
    }

    /// Drop every validation result stored for a plugin id.
    pub async fn invalidate_by_plugin_id(&self, plugin_id: &str) {
        let keys = self
            .inner
            .owners
            .remove(plugin_id)
            .map(|(_, owned)| owned)
            .unwrap_or_default();

        for (_, key) in &keys {
            self.inner.validations.invalidate(key).await;
        }
        debug!(plugin = %plugin_id, keys_invalidated = keys.len(), "plugin cache invalidated");
    }

    /// Drop everything in both namespaces.
    pub async fn clear(&self) {
        self.inner.validations.invalidate_all();
        self.inner.index.invalidate_all();
        self.inner.owners.clear();
        self.inner.validations.run_pending_tasks().await;
        self.inner.index.run_pending_tasks().await;
    }

    /// Return the cached result for `key`, or run `init` to produce it.
    ///
    /// Only one `init` runs per key at a time; concurrent callers get the
    /// same result. Incomplete resolutions are handed to every waiter but
    /// not stored.
    pub async fn get_or_resolve<F>(
        &self,
        key: &str,
        plugin_id: &str,
        version: &str,
        init: F,
    ) -> ValidationResult
    where
        F: Future<Output = Resolution>,
    {
        let ttl = self.inner.validation_ttl;
        if ttl.is_zero() {
            return init.await.result;
        }

        let entry_key = key.to_string();
        let loaded = self
            .inner
            .validations
            .entry(key.to_string())
            .or_try_insert_with(async move {
                let resolution = init.await;
                if resolution.complete {
                    Ok(CacheEntry::new(entry_key, resolution.result, ttl))
                } else {
                    Err(resolution.result)
                }
            })
            .await;

        match loaded {
            Ok(entry) => {
                if entry.is_fresh() {
                    self.track(key, plugin_id, version).await;
                } else {
                    debug!(key = %key, plugin = %plugin_id, "validation cache hit");
                }
                entry.into_value().value
            }
            Err(partial) => {
                debug!(key = %key, plugin = %plugin_id, "incomplete validation not cached");
                (*partial).clone()
            }
        }
    }

    /// Return cached index versions for `name`, or run `init` to fetch them.
    ///
    /// Single-flight like [`get_or_resolve`](Self::get_or_resolve). Errors are
    /// never cached.
    pub async fn index_versions_or_lookup<F>(&self, name: &str, init: F) -> Result<Arc<Vec<Version>>, IndexError>
    where
        F: Future<Output = Result<Vec<Version>, IndexError>>,
    {
        let ttl = self.inner.index_ttl;
        if ttl.is_zero() {
            return init.await.map(Arc::new);
        }

        let entry_key = name.to_string();
        self.inner
            .index
            .try_get_with(name.to_string(), async move {
                init.await
                    .map(|versions| CacheEntry::new(entry_key, Arc::new(versions), ttl))
            })
            .await
            .map(|entry| entry.value)
            .map_err(|e| (*e).clone())
    }

    /// Drop the cached version list for one dependency name.
    pub async fn invalidate_index(&self, name: &str) {
        self.inner.index.invalidate(name).await;
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.validations.run_pending_tasks().await;
        self.inner.index.run_pending_tasks().await;
        CacheStats {
            validation_entries: self.inner.validations.entry_count(),
            index_entries: self.inner.index.entry_count(),
        }
    }

    /// Record ownership of `key` and evict results stored for the same plugin
    /// version under a different fingerprint.
    async fn track(&self, key: &str, plugin_id: &str, version: &str) {
        let stale: Vec<String> = {
            let mut owned = self.inner.owners.entry(plugin_id.to_string()).or_default();
            let stale = owned
                .iter()
                .filter(|(v, k)| v == version && k != key)
                .map(|(_, k)| k.clone())
                .collect();
            owned.retain(|(v, k)| v != version || k == key);
            if !owned.iter().any(|(_, k)| k == key) {
                owned.push((version.to_string(), key.to_string()));
            }
            stale
        };

        for old in &stale {
            self.inner.validations.invalidate(old).await;
            debug!(plugin = %plugin_id, version = %version, key = %old, "evicted stale fingerprint");
        }
    }
}
