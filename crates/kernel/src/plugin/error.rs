//! Plugin system error types with clear, actionable messages.
//!
//! Errors name the plugin involved so a failing registration or manifest can
//! be traced back to its source without reading logs.

use lakebench_sdk::diagnostics::{ErrorCode, StructuredError};
use lakebench_sdk::types::{Conflict, PluginStatus};
use thiserror::Error;

/// Errors returned by the registry, load ordering and manifest parsing.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin with the same id is already in the registry.
    #[error("plugin '{plugin}': already registered (status {status})")]
    DuplicateRegistration { plugin: String, status: PluginStatus },

    /// Metadata failed basic checks before registration.
    #[error("plugin '{plugin}': invalid metadata: {details}")]
    InvalidMetadata { plugin: String, details: String },

    /// A lifecycle transition the state machine does not allow.
    #[error("plugin '{plugin}': cannot move from {from} to {to}")]
    InvalidTransition {
        plugin: String,
        from: PluginStatus,
        to: PluginStatus,
    },

    /// No plugin with this id is registered.
    #[error("plugin '{plugin}': not registered")]
    NotFound { plugin: String },

    /// Circular dependency detected while ordering plugins.
    #[error("circular dependency detected involving plugins: {cycle}")]
    CircularDependency { cycle: String },

    /// Manifest file could not be read.
    #[error("manifest {path}: {details}")]
    ManifestUnreadable { path: String, details: String },

    /// Manifest file is not valid TOML or is missing fields.
    #[error("manifest {path}: failed to parse: {details}")]
    InvalidManifest { path: String, details: String },
}

impl PluginError {
    pub fn duplicate(plugin: impl Into<String>, status: PluginStatus) -> Self {
        Self::DuplicateRegistration {
            plugin: plugin.into(),
            status,
        }
    }

    pub fn invalid_metadata(plugin: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            plugin: plugin.into(),
            details: details.into(),
        }
    }

    pub fn invalid_transition(plugin: impl Into<String>, from: PluginStatus, to: PluginStatus) -> Self {
        Self::InvalidTransition {
            plugin: plugin.into(),
            from,
            to,
        }
    }

    pub fn not_found(plugin: impl Into<String>) -> Self {
        Self::NotFound {
            plugin: plugin.into(),
        }
    }

    /// Diagnostic code for errors that have one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::DuplicateRegistration { .. } => Some(ErrorCode::DuplicateRegistration),
            Self::CircularDependency { .. } => Some(ErrorCode::DependencyCycle),
            _ => None,
        }
    }

    /// Create a circular dependency error listing every plugin left unordered.
    pub fn circular(plugins: &[String]) -> Self {
        Self::CircularDependency {
            cycle: plugins.join(", "),
        }
    }
}

/// Multi-plugin resolution failed because of a cycle or an over-deep chain.
///
/// Carries every problem found in the same pass, including range conflicts,
/// so callers can report them together.
#[derive(Debug, Clone, Error)]
#[error("dependency resolution failed: {}", summary(.errors))]
pub struct ResolutionError {
    pub errors: Vec<StructuredError>,
    pub conflicts: Vec<Conflict>,
}

fn summary(errors: &[StructuredError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
