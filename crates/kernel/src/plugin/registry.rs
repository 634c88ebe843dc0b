//! Plugin registry and lifecycle.
//!
//! The registry owns every registered [`PluginMetadata`] with its lifecycle
//! status and last [`ValidationResult`]. Registration drives the state
//! machine in [`status`](super::status):
//!
//! 1. insert as REGISTERED (duplicate ids are rejected)
//! 2. INITIALIZING: capability check and dependency validation. Dependencies
//!    naming another registered plugin are checked against the registry;
//!    the rest go to the package index.
//! 3. claim the table format and become ACTIVE, or ERROR
//!
//! The catalog sits behind a synchronous lock that is never held across an
//! await. Format claims are serialized by an async mutex so two plugins for
//! the same format cannot both become ACTIVE.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use lakebench_sdk::diagnostics::{ErrorCode, StructuredError};
use lakebench_sdk::types::{
    CompatibilityResult, DiagnosticReport, PluginMetadata, PluginStatus, TableFormat,
    ValidationResult,
};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::dependency::DependencyManager;
use super::error::{PluginError, ResolutionError};
use super::status::check_transition;
use crate::cache::fingerprint;
use crate::config::RegistryConfig;
use crate::version::{VersionRange, parse_version};

const REGISTER_OP: &str = "plugin_registration";

/// A registered plugin.
#[derive(Debug, Clone, Serialize)]
pub struct PluginEntry {
    pub metadata: PluginMetadata,
    pub status: PluginStatus,
    /// Result of the most recent activation attempt.
    pub validation: Option<ValidationResult>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What happened to one plugin during registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub plugin_id: String,
    pub status: PluginStatus,
    pub validation_result: ValidationResult,
}

impl RegistrationOutcome {
    pub fn is_active(&self) -> bool {
        self.status == PluginStatus::Active
    }
}

/// The plugin that stopped a batch, and why.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub plugin_id: String,
    /// Code of the first diagnostic that stopped the plugin, if it has one.
    pub code: Option<ErrorCode>,
    pub reason: String,
}

/// Result of [`PluginRegistry::register_batch`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Outcomes in registration order, including the failing plugin's.
    pub outcomes: Vec<RegistrationOutcome>,
    pub halted_on: Option<BatchFailure>,
    /// Plugins never attempted because the batch halted.
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.halted_on.is_none()
    }
}

/// Catalog of registered plugins.
pub struct PluginRegistry {
    dependencies: DependencyManager,
    config: RegistryConfig,
    catalog: RwLock<HashMap<String, PluginEntry>>,
    /// format name → id of the ACTIVE plugin serving it.
    active_formats: Mutex<HashMap<String, String>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new(dependencies: DependencyManager, config: RegistryConfig) -> Self {
        Self {
            dependencies,
            config,
            catalog: RwLock::new(HashMap::new()),
            active_formats: Mutex::new(HashMap::new()),
        }
    }

    pub fn dependency_manager(&self) -> &DependencyManager {
        &self.dependencies
    }

    /// Register a plugin and try to activate it.
    ///
    /// Dependency, capability and format problems do not fail the call: the
    /// plugin ends in ERROR and the outcome carries the diagnostics. Only
    /// duplicate ids and unusable metadata are returned as errors, and
    /// neither changes registry state.
    pub async fn register(&self, metadata: PluginMetadata) -> Result<RegistrationOutcome, PluginError> {
        check_metadata(&metadata)?;

        let plugin_id = metadata.id.clone();
        {
            let mut catalog = self.catalog.write();
            if let Some(existing) = catalog.get(&plugin_id) {
                return Err(PluginError::duplicate(&plugin_id, existing.status));
            }
            let now = Utc::now();
            info!(plugin = %plugin_id, version = %metadata.version, format = %metadata.format, "plugin registered");
            catalog.insert(
                plugin_id.clone(),
                PluginEntry {
                    metadata,
                    status: PluginStatus::Registered,
                    validation: None,
                    registered_at: now,
                    updated_at: now,
                },
            );
        }

        self.activate(&plugin_id).await
    }

    /// Run initialization for a REGISTERED plugin.
    ///
    /// Used by [`register`](Self::register) and to bring a deactivated plugin
    /// back.
    pub async fn activate(&self, plugin_id: &str) -> Result<RegistrationOutcome, PluginError> {
        let metadata = self.transition(plugin_id, PluginStatus::Initializing, None)?;

        let (packages, plugin_errors, plugin_warnings) = self.check_plugin_dependencies(&metadata);
        let mut result = self.dependencies.validate_dependencies(&packages).await;
        result.warnings.extend(plugin_warnings);
        for error in plugin_errors.into_iter().chain(self.capability_errors(&metadata)) {
            result.push_error(error);
        }

        if !result.is_valid {
            self.transition(plugin_id, PluginStatus::Error, Some(result.clone()))?;
            return Ok(outcome(plugin_id, PluginStatus::Error, result));
        }

        let format = metadata.format_name().to_string();
        let mut formats = self.active_formats.lock().await;
        if let Some(owner) = formats.get(&format).filter(|owner| owner.as_str() != plugin_id) {
            warn!(plugin = %plugin_id, format = %format, owner = %owner, "table format already served");
            result.push_error(
                StructuredError::new(
                    ErrorCode::FormatConflict,
                    plugin_id,
                    REGISTER_OP,
                    format!("Table format '{format}' is already served by active plugin '{owner}'"),
                )
                .suggest(format!("Deactivate '{owner}' before activating '{plugin_id}'")),
            );
            self.transition(plugin_id, PluginStatus::Error, Some(result.clone()))?;
            return Ok(outcome(plugin_id, PluginStatus::Error, result));
        }

        self.transition(plugin_id, PluginStatus::Active, Some(result.clone()))?;
        formats.insert(format, plugin_id.to_string());
        Ok(outcome(plugin_id, PluginStatus::Active, result))
    }

    /// Register plugins in order, stopping at the first failure.
    ///
    /// Plugins activated before the failure stay ACTIVE.
    pub async fn register_batch(&self, plugins: Vec<PluginMetadata>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut pending = plugins.into_iter();

        while let Some(metadata) = pending.next() {
            let plugin_id = metadata.id.clone();
            let failure = match self.register(metadata).await {
                Ok(outcome) => {
                    let failure = (!outcome.is_active()).then(|| BatchFailure {
                        plugin_id: plugin_id.clone(),
                        code: outcome.validation_result.errors.first().map(|e| e.code),
                        reason: outcome
                            .validation_result
                            .errors
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join("; "),
                    });
                    report.outcomes.push(outcome);
                    failure
                }
                Err(e) => Some(BatchFailure {
                    plugin_id: plugin_id.clone(),
                    code: e.code(),
                    reason: e.to_string(),
                }),
            };

            if let Some(failure) = failure {
                report.skipped = pending.map(|m| m.id).collect();
                warn!(
                    plugin = %failure.plugin_id,
                    skipped = report.skipped.len(),
                    "batch registration halted"
                );
                report.halted_on = Some(failure);
                break;
            }
        }

        report
    }

    /// Move an ACTIVE plugin back to REGISTERED and free its format.
    pub async fn deactivate(&self, plugin_id: &str) -> Result<(), PluginError> {
        let mut formats = self.active_formats.lock().await;
        let metadata = self.transition(plugin_id, PluginStatus::Registered, None)?;
        let format = metadata.format_name();
        if formats.get(format).is_some_and(|owner| owner == plugin_id) {
            formats.remove(format);
        }
        Ok(())
    }

    pub fn get(&self, plugin_id: &str) -> Option<PluginEntry> {
        self.catalog.read().get(plugin_id).cloned()
    }

    pub fn status(&self, plugin_id: &str) -> Option<PluginStatus> {
        self.catalog.read().get(plugin_id).map(|entry| entry.status)
    }

    pub fn validation_result(&self, plugin_id: &str) -> Option<ValidationResult> {
        self.catalog
            .read()
            .get(plugin_id)
            .and_then(|entry| entry.validation.clone())
    }

    /// All registered plugins, sorted by id.
    pub fn plugins(&self) -> Vec<PluginEntry> {
        let mut entries: Vec<_> = self.catalog.read().values().cloned().collect();
        entries.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
        entries
    }

    /// Format name → id of the ACTIVE plugin serving it.
    pub async fn active_formats(&self) -> BTreeMap<String, String> {
        self.active_formats
            .lock()
            .await
            .iter()
            .map(|(format, owner)| (format.clone(), owner.clone()))
            .collect()
    }

    /// One entry per table format seen in the registry.
    ///
    /// A format backed by an ACTIVE plugin reports that plugin; otherwise the
    /// first registered plugin for the format (by id) is shown.
    pub fn formats(&self) -> Vec<TableFormat> {
        let mut by_name: BTreeMap<String, TableFormat> = BTreeMap::new();
        for entry in self.plugins() {
            let format = TableFormat {
                name: entry.metadata.format_name().to_string(),
                version: entry.metadata.version.clone(),
                enabled: entry.status == PluginStatus::Active,
                status: entry.status,
            };
            match by_name.get(&format.name) {
                Some(current) if current.enabled || !format.enabled => {}
                _ => {
                    by_name.insert(format.name.clone(), format);
                }
            }
        }
        by_name.into_values().collect()
    }

    /// Check every registered plugin against the others.
    pub fn compatibility(&self) -> Result<CompatibilityResult, ResolutionError> {
        let plugins: Vec<PluginMetadata> = self
            .plugins()
            .into_iter()
            .map(|entry| entry.metadata)
            .collect();
        self.dependencies.resolve_dependencies(&plugins)
    }

    /// Snapshot of one plugin's state for troubleshooting.
    pub async fn diagnose(&self, plugin_id: &str) -> Result<DiagnosticReport, PluginError> {
        let entry = self
            .get(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;
        // Activation validates only the dependencies left for the index.
        let (packages, _, _) = self.check_plugin_dependencies(&entry.metadata);
        let key = fingerprint(&packages);
        let cached = self.dependencies.cache().get(&key).await.is_some();
        let format = entry.metadata.format_name().to_string();
        let format_owner = self.active_formats.lock().await.get(&format).cloned();

        let missing_capabilities: Vec<&str> = self
            .config
            .required_capabilities
            .difference(&entry.metadata.capabilities)
            .map(|cap| cap.as_str())
            .collect();

        let validation = entry.validation.as_ref().map(|v| {
            serde_json::json!({
                "is_valid": v.is_valid,
                "error_codes": v.error_codes(),
                "warnings": v.warnings,
            })
        });

        let details = serde_json::json!({
            "version": entry.metadata.version,
            "format": format,
            "format_owner": format_owner,
            "dependencies": entry.metadata.dependencies.values().map(ToString::to_string).collect::<Vec<_>>(),
            "capabilities": entry.metadata.capabilities,
            "missing_capabilities": missing_capabilities,
            "validation": validation,
            "fingerprint": key,
            "cached": cached,
            "registered_at": entry.registered_at,
            "updated_at": entry.updated_at,
        });

        Ok(DiagnosticReport {
            plugin_id: plugin_id.to_string(),
            status: entry.status,
            details,
            timestamp: Utc::now(),
        })
    }

    /// Drop every plugin, format claim and cached result.
    pub async fn teardown(&self) {
        let mut formats = self.active_formats.lock().await;
        formats.clear();
        let removed = {
            let mut catalog = self.catalog.write();
            let count = catalog.len();
            catalog.clear();
            count
        };
        drop(formats);
        self.dependencies.cache().clear().await;
        info!(plugins = removed, "plugin registry torn down");
    }

    /// Check dependencies that name another registered plugin.
    ///
    /// Such a dependency is satisfied when that plugin is ACTIVE and its
    /// version is in range. Returns the metadata with only package
    /// dependencies left, for validation against the index.
    fn check_plugin_dependencies(
        &self,
        metadata: &PluginMetadata,
    ) -> (PluginMetadata, Vec<StructuredError>, Vec<String>) {
        let mut packages = metadata.clone();
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let catalog = self.catalog.read();

        for spec in metadata.dependencies.values() {
            if spec.name == metadata.id {
                continue;
            }
            let Some(target) = catalog.get(&spec.name) else {
                continue;
            };
            packages.dependencies.remove(&spec.name);

            let in_range = VersionRange::parse(&spec.version_range)
                .ok()
                .zip(parse_version(&target.metadata.version).ok())
                .is_some_and(|(range, version)| range.contains(&version));
            if in_range && target.status == PluginStatus::Active {
                continue;
            }

            let problem = if in_range {
                format!("plugin {} is {}", spec.name, target.status)
            } else {
                format!(
                    "plugin {} {} does not satisfy {}",
                    spec.name, target.metadata.version, spec.version_range
                )
            };

            if spec.is_required() {
                errors.push(
                    StructuredError::new(
                        ErrorCode::MissingRequiredDependency,
                        &metadata.id,
                        REGISTER_OP,
                        format!("Required dependency {}: {problem}", spec.name),
                    )
                    .with_dependency(&spec.name)
                    .with_required_version(&spec.version_range)
                    .with_found_version(Some(target.metadata.version.clone()))
                    .suggest(format!(
                        "Activate a version of '{}' matching {}",
                        spec.name, spec.version_range
                    )),
                );
            } else {
                warnings.push(format!("Optional dependency {}: {problem}", spec.name));
            }
        }

        (packages, errors, warnings)
    }

    fn capability_errors(&self, metadata: &PluginMetadata) -> Vec<StructuredError> {
        self.config
            .required_capabilities
            .difference(&metadata.capabilities)
            .map(|cap| {
                StructuredError::new(
                    ErrorCode::MissingCapability,
                    &metadata.id,
                    REGISTER_OP,
                    format!("Plugin does not declare required capability '{cap}'"),
                )
                .suggest(format!("Add \"{cap}\" to the capabilities list in the plugin manifest"))
            })
            .collect()
    }

    /// Apply one lifecycle transition under the catalog lock.
    ///
    /// Returns the plugin's metadata so callers can continue without holding
    /// the lock.
    fn transition(
        &self,
        plugin_id: &str,
        to: PluginStatus,
        validation: Option<ValidationResult>,
    ) -> Result<PluginMetadata, PluginError> {
        let mut catalog = self.catalog.write();
        let entry = catalog
            .get_mut(plugin_id)
            .ok_or_else(|| PluginError::not_found(plugin_id))?;

        check_transition(plugin_id, entry.status, to)?;
        let from = entry.status;
        entry.status = to;
        entry.updated_at = Utc::now();
        if validation.is_some() {
            entry.validation = validation;
        }

        info!(plugin = %plugin_id, %from, %to, "plugin status changed");
        Ok(entry.metadata.clone())
    }
}

fn outcome(plugin_id: &str, status: PluginStatus, validation_result: ValidationResult) -> RegistrationOutcome {
    RegistrationOutcome {
        plugin_id: plugin_id.to_string(),
        status,
        validation_result,
    }
}

fn check_metadata(metadata: &PluginMetadata) -> Result<(), PluginError> {
    if metadata.id.trim().is_empty() {
        return Err(PluginError::invalid_metadata("<unnamed>", "empty 'id' field"));
    }
    parse_version(&metadata.version)
        .map_err(|e| PluginError::invalid_metadata(&metadata.id, e.to_string()))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lakebench_sdk::types::{Capability, DependencySpec, FormatKind};

    use crate::config::DependencyConfig;
    use crate::index::MemoryIndex;

    fn registry(index: MemoryIndex) -> PluginRegistry {
        let deps = DependencyManager::new(DependencyConfig::default(), Arc::new(index));
        PluginRegistry::new(deps, RegistryConfig::default())
    }

    fn plugin(id: &str, format: FormatKind) -> PluginMetadata {
        PluginMetadata::new(id, id, "1.0.0", format).with_capabilities([Capability::Read, Capability::Write])
    }

    #[tokio::test]
    async fn clean_plugin_becomes_active() {
        let reg = registry(MemoryIndex::new());
        let outcome = reg.register(plugin("delta-plugin", FormatKind::Delta)).await.unwrap();

        assert!(outcome.is_active());
        assert_eq!(reg.status("delta-plugin"), Some(PluginStatus::Active));
        assert_eq!(
            reg.active_formats().await.get("delta").map(String::as_str),
            Some("delta-plugin")
        );
    }

    #[tokio::test]
    async fn failed_validation_ends_in_error() {
        let reg = registry(MemoryIndex::new().with_package("delta-spark", &["1.9.0"]));
        let meta = plugin("delta-plugin", FormatKind::Delta)
            .with_dependency(DependencySpec::required("delta-spark", ">=2.0.0"));

        let outcome = reg.register(meta).await.unwrap();
        assert_eq!(outcome.status, PluginStatus::Error);
        assert_eq!(outcome.validation_result.error_codes(), vec!["DEP001"]);
        assert_eq!(reg.status("delta-plugin"), Some(PluginStatus::Error));
        assert!(reg.active_formats().await.is_empty());
        assert!(!reg.validation_result("delta-plugin").unwrap().is_valid);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_state_change() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("delta-plugin", FormatKind::Delta)).await.unwrap();

        let mut again = plugin("delta-plugin", FormatKind::Delta);
        again.version = "2.0.0".into();
        let err = reg.register(again).await.unwrap_err();

        assert!(matches!(err, PluginError::DuplicateRegistration { .. }));
        let entry = reg.get("delta-plugin").unwrap();
        assert_eq!(entry.status, PluginStatus::Active);
        assert_eq!(entry.metadata.version, "1.0.0");
    }

    #[tokio::test]
    async fn invalid_metadata_is_rejected() {
        let reg = registry(MemoryIndex::new());
        let mut meta = plugin("p", FormatKind::Hudi);
        meta.version = "one".into();

        assert!(matches!(
            reg.register(meta).await.unwrap_err(),
            PluginError::InvalidMetadata { .. }
        ));
        assert!(reg.plugins().is_empty());
    }

    #[tokio::test]
    async fn missing_capability_blocks_activation() {
        let reg = registry(MemoryIndex::new());
        let meta = PluginMetadata::new("paimon-plugin", "Paimon", "0.1.0", FormatKind::Paimon)
            .with_capabilities([Capability::Read]);

        let outcome = reg.register(meta).await.unwrap();
        assert_eq!(outcome.status, PluginStatus::Error);
        assert_eq!(outcome.validation_result.error_codes(), vec!["PLG_CAPABILITY"]);
    }

    #[tokio::test]
    async fn second_plugin_for_active_format_fails() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("delta-a", FormatKind::Delta)).await.unwrap();
        let outcome = reg.register(plugin("delta-b", FormatKind::Delta)).await.unwrap();

        assert_eq!(outcome.status, PluginStatus::Error);
        assert_eq!(outcome.validation_result.error_codes(), vec!["PLG_FORMAT_CONFLICT"]);
        assert_eq!(reg.status("delta-a"), Some(PluginStatus::Active));
    }

    #[tokio::test]
    async fn deactivate_frees_the_format() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("iceberg-a", FormatKind::Iceberg)).await.unwrap();
        reg.deactivate("iceberg-a").await.unwrap();

        assert_eq!(reg.status("iceberg-a"), Some(PluginStatus::Registered));
        assert!(reg.active_formats().await.is_empty());

        let outcome = reg.register(plugin("iceberg-b", FormatKind::Iceberg)).await.unwrap();
        assert!(outcome.is_active());
    }

    #[tokio::test]
    async fn deactivated_plugin_can_be_activated_again() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("hudi-plugin", FormatKind::Hudi)).await.unwrap();
        reg.deactivate("hudi-plugin").await.unwrap();

        let outcome = reg.activate("hudi-plugin").await.unwrap();
        assert!(outcome.is_active());
    }

    #[tokio::test]
    async fn error_plugin_cannot_be_reactivated() {
        let reg = registry(MemoryIndex::new());
        let meta = PluginMetadata::new("p", "P", "1.0.0", FormatKind::Delta);
        reg.register(meta).await.unwrap();

        let err = reg.activate("p").await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidTransition { .. }));
        assert!(matches!(
            reg.deactivate("p").await.unwrap_err(),
            PluginError::InvalidTransition { .. }
        ));
    }

    #[tokio::test]
    async fn plugin_dependencies_are_checked_against_the_registry() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("base", FormatKind::Delta)).await.unwrap();

        let ok = plugin("ext", FormatKind::Iceberg).with_dependency(DependencySpec::required("base", "^1.0"));
        assert!(reg.register(ok).await.unwrap().is_active());

        let too_new =
            plugin("ext2", FormatKind::Hudi).with_dependency(DependencySpec::required("base", ">=2.0.0"));
        let outcome = reg.register(too_new).await.unwrap();
        assert_eq!(outcome.validation_result.error_codes(), vec!["DEP001"]);
        assert_eq!(
            outcome.validation_result.errors[0].context.found_version.as_deref(),
            Some("1.0.0")
        );
    }

    #[tokio::test]
    async fn dependency_on_inactive_plugin_fails() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("base", FormatKind::Delta)).await.unwrap();
        reg.deactivate("base").await.unwrap();

        let ext = plugin("ext", FormatKind::Iceberg).with_dependency(DependencySpec::required("base", "*"));
        let outcome = reg.register(ext).await.unwrap();
        assert_eq!(outcome.status, PluginStatus::Error);
        assert!(outcome.validation_result.errors[0].message.contains("REGISTERED"));
    }

    #[tokio::test]
    async fn batch_halts_on_first_failure_without_rollback() {
        let reg = registry(MemoryIndex::new());
        let bad = plugin("bad", FormatKind::Hudi)
            .with_dependency(DependencySpec::required("missing-lib", ">=1.0"));

        let report = reg
            .register_batch(vec![
                plugin("good", FormatKind::Delta),
                bad,
                plugin("later", FormatKind::Iceberg),
            ])
            .await;

        assert!(!report.is_complete());
        assert_eq!(report.halted_on.as_ref().unwrap().plugin_id, "bad");
        assert!(report.halted_on.as_ref().unwrap().reason.contains("DEP001"));
        assert_eq!(
            report.halted_on.as_ref().unwrap().code,
            Some(ErrorCode::MissingRequiredDependency)
        );
        assert_eq!(report.skipped, vec!["later"]);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(reg.status("good"), Some(PluginStatus::Active));
        assert_eq!(reg.status("later"), None);
    }

    #[tokio::test]
    async fn batch_duplicate_carries_its_code() {
        let reg = registry(MemoryIndex::new());
        let report = reg
            .register_batch(vec![
                plugin("delta-plugin", FormatKind::Delta),
                plugin("delta-plugin", FormatKind::Delta),
            ])
            .await;

        let failure = report.halted_on.unwrap();
        assert_eq!(failure.code, Some(ErrorCode::DuplicateRegistration));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["code"], "PLG_DUPLICATE");
    }

    #[tokio::test]
    async fn diagnose_fingerprints_the_validated_dependencies() {
        let reg = registry(MemoryIndex::new().with_package("pyarrow", &["14.0.1"]));
        reg.register(plugin("base", FormatKind::Delta)).await.unwrap();
        let ext = plugin("ext", FormatKind::Iceberg)
            .with_dependency(DependencySpec::required("base", "^1.0"))
            .with_dependency(DependencySpec::required("pyarrow", ">=10.0"));
        assert!(reg.register(ext.clone()).await.unwrap().is_active());

        let mut packages = ext.clone();
        packages.dependencies.remove("base");

        let report = reg.diagnose("ext").await.unwrap();
        assert_eq!(report.details["fingerprint"], fingerprint(&packages));
        assert_ne!(report.details["fingerprint"], fingerprint(&ext));
        assert_eq!(report.details["cached"], true);
    }

    #[tokio::test]
    async fn formats_prefer_the_active_plugin() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("delta-b", FormatKind::Delta)).await.unwrap();
        reg.register(plugin("delta-a", FormatKind::Delta)).await.unwrap();

        let formats = reg.formats();
        assert_eq!(formats.len(), 1);
        assert_eq!(formats[0].name, "delta");
        assert!(formats[0].enabled);
        assert_eq!(formats[0].status, PluginStatus::Active);
    }

    #[tokio::test]
    async fn diagnose_reports_state() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("delta-plugin", FormatKind::Delta)).await.unwrap();

        let report = reg.diagnose("delta-plugin").await.unwrap();
        assert_eq!(report.status, PluginStatus::Active);
        assert_eq!(report.details["format"], "delta");
        assert_eq!(report.details["format_owner"], "delta-plugin");
        assert_eq!(report.details["validation"]["is_valid"], true);
        assert_eq!(report.details["cached"], true);

        assert!(matches!(
            reg.diagnose("nope").await.unwrap_err(),
            PluginError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn teardown_clears_everything() {
        let reg = registry(MemoryIndex::new());
        reg.register(plugin("delta-plugin", FormatKind::Delta)).await.unwrap();
        reg.teardown().await;

        assert!(reg.plugins().is_empty());
        assert!(reg.active_formats().await.is_empty());
        assert!(reg.register(plugin("delta-plugin", FormatKind::Delta)).await.unwrap().is_active());
    }
}
