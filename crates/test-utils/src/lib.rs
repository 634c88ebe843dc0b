//! Lakebench test utilities.
//!
//! Helpers for integration testing: plugin metadata builders, an
//! instrumented package index, and assertion utilities for validation and
//! registry results.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lakebench_kernel::config::{DependencyConfig, RegistryConfig};
use lakebench_kernel::index::{IndexError, MemoryIndex, PackageIndex};
use lakebench_kernel::plugin::{DependencyManager, PluginRegistry};
use lakebench_sdk::types::{Capability, DependencySpec, FormatKind, PluginMetadata};
use parking_lot::Mutex;
use semver::Version;

/// Create plugin metadata with version 1.0.0 and the default required
/// capabilities (read, write).
pub fn test_plugin(id: &str, format: FormatKind) -> PluginMetadata {
    PluginMetadata::new(id, id, "1.0.0", format).with_capabilities([Capability::Read, Capability::Write])
}

/// Create plugin metadata with the given dependencies.
pub fn plugin_with_deps(id: &str, format: FormatKind, deps: &[DependencySpec]) -> PluginMetadata {
    deps.iter()
        .cloned()
        .fold(test_plugin(id, format), PluginMetadata::with_dependency)
}

/// Dependency settings for tests: short timeouts and near-zero backoff.
pub fn fast_config() -> DependencyConfig {
    DependencyConfig {
        lookup_timeout: Duration::from_millis(500),
        retry_backoff: Duration::from_millis(1),
        ..DependencyConfig::default()
    }
}

/// Build a dependency manager over a fixture index.
pub fn manager(index: &Arc<FixtureIndex>, config: DependencyConfig) -> DependencyManager {
    DependencyManager::new(config, Arc::clone(index) as Arc<dyn PackageIndex>)
}

/// Build an empty registry over a fixture index with default registry settings.
pub fn registry(index: &Arc<FixtureIndex>, config: DependencyConfig) -> PluginRegistry {
    PluginRegistry::new(manager(index, config), RegistryConfig::default())
}

/// Package index that records every lookup and can inject failures.
///
/// Wraps a [`MemoryIndex`]; failures and latency are applied before the
/// wrapped index is consulted.
#[derive(Debug, Default)]
pub struct FixtureIndex {
    packages: MemoryIndex,
    lookups: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    latency: Mutex<Option<Duration>>,
    total: AtomicUsize,
}

impl FixtureIndex {
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
        self.packages.publish(name, versions);
    }

    /// Make the next `times` lookups of `name` fail as unavailable.
    pub fn fail_next(&self, name: &str, times: usize) {
        self.failures.lock().insert(name.to_string(), times);
    }

    /// Delay every lookup by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Number of lookups made for `name`, including failed ones.
    pub fn lookups(&self, name: &str) -> usize {
        self.lookups.lock().get(name).copied().unwrap_or(0)
    }

    /// Number of lookups made for any name.
    pub fn total_lookups(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageIndex for FixtureIndex {
    async fn lookup(&self, name: &str) -> Result<Vec<Version>, IndexError> {
        *self.lookups.lock().entry(name.to_string()).or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let fail = {
            let mut failures = self.failures.lock();
            match failures.get_mut(name) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(IndexError::unavailable(name, "injected failure"));
        }

        self.packages.lookup(name).await
    }

    fn source(&self) -> String {
        "fixture".to_string()
    }
}

/// Assertion helpers for dependency and registry results.
pub mod assert {
    use lakebench_kernel::plugin::PluginRegistry;
    use lakebench_sdk::diagnostics::StructuredError;
    use lakebench_sdk::types::{PluginStatus, ValidationResult};

    /// Assert that the result carries exactly these error codes, in order.
    pub fn error_codes(result: &ValidationResult, expected: &[&str]) {
        assert_eq!(
            result.error_codes(),
            expected,
            "unexpected error codes, errors: {:#?}",
            result.errors
        );
    }

    /// Return the first error with `code`, failing if there is none.
    pub fn find_error<'a>(result: &'a ValidationResult, code: &str) -> &'a StructuredError {
        match result.errors.iter().find(|e| e.code.as_str() == code) {
            Some(error) => error,
            None => panic!("expected a {code} error, got: {:#?}", result.errors),
        }
    }

    /// Assert a plugin's current lifecycle status.
    pub fn status(registry: &PluginRegistry, plugin_id: &str, expected: PluginStatus) {
        assert_eq!(
            registry.status(plugin_id),
            Some(expected),
            "plugin '{plugin_id}' has unexpected status"
        );
    }

    /// Assert that some warning mentions `needle`.
    pub fn warning_contains(result: &ValidationResult, needle: &str) {
        assert!(
            result.warnings.iter().any(|w| w.contains(needle)),
            "Expected a warning containing '{needle}'\nActual: {:?}",
            result.warnings
        );
    }
}
