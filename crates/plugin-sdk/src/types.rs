//! Core types for Lakebench plugins.
//!
//! These types are the only thing exchanged between plugin loaders and the
//! kernel. They are plain serde records: a loader fills in a
//! [`PluginMetadata`] (usually from a `.plugin.toml` manifest) and the kernel
//! reports back with [`ValidationResult`] and [`CompatibilityResult`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnostics::{ErrorCode, StructuredError};

/// Whether a dependency must be satisfied for the plugin to activate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyKind {
    #[default]
    #[serde(alias = "required")]
    Required,
    #[serde(alias = "optional")]
    Optional,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::Optional => "OPTIONAL",
        }
    }
}

/// Where a dependency is needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyScope {
    #[default]
    #[serde(alias = "runtime")]
    Runtime,
    #[serde(alias = "test")]
    Test,
}

impl DependencyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Runtime => "RUNTIME",
            Self::Test => "TEST",
        }
    }
}

/// A single declared dependency of a plugin.
///
/// `version_range` is a comma-separated comparator list such as
/// `>=2.0.0,<3.0.0` or `^1.4`. The kernel parses it; the SDK keeps it as text
/// so malformed declarations can be reported rather than rejected on load.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,

    #[serde(alias = "version")]
    pub version_range: String,

    #[serde(default)]
    pub kind: DependencyKind,

    #[serde(default)]
    pub scope: DependencyScope,
}

impl DependencySpec {
    /// A required runtime dependency.
    pub fn required(name: impl Into<String>, version_range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_range: version_range.into(),
            kind: DependencyKind::Required,
            scope: DependencyScope::Runtime,
        }
    }

    /// An optional runtime dependency.
    pub fn optional(name: impl Into<String>, version_range: impl Into<String>) -> Self {
        Self {
            kind: DependencyKind::Optional,
            ..Self::required(name, version_range)
        }
    }

    /// Move this dependency into the given scope.
    pub fn in_scope(mut self, scope: DependencyScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn is_required(&self) -> bool {
        self.kind == DependencyKind::Required
    }
}

impl fmt::Display for DependencySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version_range)
    }
}

/// Table format implemented by a plugin.
///
/// Serialized as its lowercase name; unknown names are kept as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FormatKind {
    Delta,
    Iceberg,
    Hudi,
    Paimon,
    Custom(String),
}

impl FormatKind {
    /// Format name used for the one-active-plugin-per-format rule.
    pub fn name(&self) -> &str {
        match self {
            Self::Delta => "delta",
            Self::Iceberg => "iceberg",
            Self::Hudi => "hudi",
            Self::Paimon => "paimon",
            Self::Custom(name) => name,
        }
    }
}

impl From<String> for FormatKind {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "delta" => Self::Delta,
            "iceberg" => Self::Iceberg,
            "hudi" => Self::Hudi,
            "paimon" => Self::Paimon,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<FormatKind> for String {
    fn from(value: FormatKind) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operations a plugin declares it supports.
///
/// Declared statically in the manifest and checked at registration; the
/// kernel never inspects plugin code to discover them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Read,
    Write,
    Update,
    Delete,
    Merge,
    TimeTravel,
    SchemaEvolution,
    Compaction,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Merge => "merge",
            Self::TimeTravel => "time_travel",
            Self::SchemaEvolution => "schema_evolution",
            Self::Compaction => "compaction",
        }
    }

    /// Parse a capability name as written in manifests and env vars.
    pub fn parse(name: &str) -> Option<Self> {
        let cap = match name.trim().to_ascii_lowercase().as_str() {
            "read" => Self::Read,
            "write" => Self::Write,
            "update" => Self::Update,
            "delete" => Self::Delete,
            "merge" => Self::Merge,
            "time_travel" => Self::TimeTravel,
            "schema_evolution" => Self::SchemaEvolution,
            "compaction" => Self::Compaction,
            _ => return None,
        };
        Some(cap)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata describing one plugin version.
///
/// Identity is `(id, version)`. Dependencies are keyed by name and kept in a
/// sorted map so iteration order (and therefore diagnostics order) is stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Globally unique plugin identifier (e.g. "delta-plugin").
    pub id: String,

    /// Human-readable name.
    pub name: String,

    /// Plugin version (semver).
    pub version: String,

    /// The table format this plugin implements.
    pub format: FormatKind,

    #[serde(default)]
    pub dependencies: BTreeMap<String, DependencySpec>,

    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
}

impl PluginMetadata {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        format: FormatKind,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            format,
            dependencies: BTreeMap::new(),
            capabilities: BTreeSet::new(),
        }
    }

    /// Add (or replace) a dependency, keyed by its name.
    pub fn with_dependency(mut self, spec: DependencySpec) -> Self {
        self.dependencies.insert(spec.name.clone(), spec);
        self
    }

    pub fn with_capabilities(mut self, caps: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities.extend(caps);
        self
    }

    pub fn format_name(&self) -> &str {
        self.format.name()
    }
}

/// Lifecycle state of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PluginStatus {
    Registered,
    Initializing,
    Active,
    Error,
}

impl PluginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Initializing => "INITIALIZING",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table format as seen by the registry, backed by exactly one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableFormat {
    pub name: String,
    /// Version of the backing plugin.
    pub version: String,
    pub enabled: bool,
    pub status: PluginStatus,
}

/// Result of validating one plugin's dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<StructuredError>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// A passing result with no diagnostics.
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Build a result; validity is derived from the absence of errors.
    pub fn from_parts(errors: Vec<StructuredError>, warnings: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Append an error and mark the result invalid.
    pub fn push_error(&mut self, error: StructuredError) {
        self.errors.push(error);
        self.is_valid = false;
    }

    /// Codes of all errors, in order.
    pub fn error_codes(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.code.as_str()).collect()
    }
}

/// One plugin's side of a compatibility problem.
///
/// `code` is `DEP_CONFLICT` for incompatible ranges or plugin versions and
/// `DEP_MALFORMED_VERSION` when a range or version could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conflict {
    pub code: ErrorCode,
    pub plugin_id: String,
    pub dependency: String,
    pub reason: String,
}

/// Result of checking a set of plugins against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub is_compatible: bool,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl CompatibilityResult {
    pub fn from_conflicts(conflicts: Vec<Conflict>) -> Self {
        Self {
            is_compatible: conflicts.is_empty(),
            conflicts,
        }
    }

    /// Ids of every plugin named in a conflict, deduplicated and sorted.
    pub fn conflicting_plugins(&self) -> BTreeSet<&str> {
        self.conflicts.iter().map(|c| c.plugin_id.as_str()).collect()
    }
}

/// Point-in-time diagnostic snapshot of a registered plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub plugin_id: String,
    pub status: PluginStatus,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
