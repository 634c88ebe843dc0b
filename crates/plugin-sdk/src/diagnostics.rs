//! Structured diagnostics reported by the kernel.
//!
//! Every problem the dependency engine finds is reported as a
//! [`StructuredError`] with a stable code, so callers can branch on the code
//! and show the human-readable message and resolution steps to users.
//!
//! # Error Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | `DEP001` | A required dependency is missing or no available version satisfies its range |
//! | `DEP_MALFORMED_VERSION` | A version or range string is not valid semver syntax |
//! | `DEP_CONFLICT` | Two or more plugins require disjoint ranges of the same dependency |
//! | `DEP_DEPTH_EXCEEDED` | Inter-plugin dependency chain is deeper than the configured limit |
//! | `DEP_CYCLE` | Plugins depend on each other in a cycle |
//! | `DEP_INDEX_UNAVAILABLE` | The package index could not be reached after retries |
//! | `PLG_DUPLICATE` | A plugin with the same id is already registered |
//! | `PLG_FORMAT_CONFLICT` | Another active plugin already serves the same table format |
//! | `PLG_CAPABILITY` | The plugin does not declare a capability the registry requires |

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable diagnostic code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "DEP001")]
    MissingRequiredDependency,
    #[serde(rename = "DEP_MALFORMED_VERSION")]
    MalformedVersion,
    #[serde(rename = "DEP_CONFLICT")]
    VersionConflict,
    #[serde(rename = "DEP_DEPTH_EXCEEDED")]
    DepthExceeded,
    #[serde(rename = "DEP_CYCLE")]
    DependencyCycle,
    #[serde(rename = "DEP_INDEX_UNAVAILABLE")]
    IndexUnavailable,
    #[serde(rename = "PLG_DUPLICATE")]
    DuplicateRegistration,
    #[serde(rename = "PLG_FORMAT_CONFLICT")]
    FormatConflict,
    #[serde(rename = "PLG_CAPABILITY")]
    MissingCapability,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRequiredDependency => "DEP001",
            Self::MalformedVersion => "DEP_MALFORMED_VERSION",
            Self::VersionConflict => "DEP_CONFLICT",
            Self::DepthExceeded => "DEP_DEPTH_EXCEEDED",
            Self::DependencyCycle => "DEP_CYCLE",
            Self::IndexUnavailable => "DEP_INDEX_UNAVAILABLE",
            Self::DuplicateRegistration => "PLG_DUPLICATE",
            Self::FormatConflict => "PLG_FORMAT_CONFLICT",
            Self::MissingCapability => "PLG_CAPABILITY",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Warn,
    Info,
}

/// Where and when a diagnostic was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Operation that produced the diagnostic (e.g. "dependency_validation").
    pub operation: String,
    pub dependency: Option<String>,
    pub required_version: Option<String>,
    pub found_version: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            dependency: None,
            required_version: None,
            found_version: None,
            timestamp: Utc::now(),
        }
    }
}

/// A diagnostic with code, context and suggested resolution steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: ErrorCode,
    pub severity: Severity,
    /// Affected plugin id or engine component.
    pub component: String,
    pub message: String,
    pub context: ErrorContext,
    #[serde(default)]
    pub resolution: Vec<String>,
}

impl StructuredError {
    /// Start an ERROR-severity diagnostic.
    pub fn new(
        code: ErrorCode,
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity: Severity::Error,
            component: component.into(),
            message: message.into(),
            context: ErrorContext::new(operation),
            resolution: Vec::new(),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.context.dependency = Some(dependency.into());
        self
    }

    pub fn with_required_version(mut self, range: impl Into<String>) -> Self {
        self.context.required_version = Some(range.into());
        self
    }

    pub fn with_found_version(mut self, version: Option<String>) -> Self {
        self.context.found_version = version;
        self
    }

    /// Append a suggested resolution step.
    pub fn suggest(mut self, step: impl Into<String>) -> Self {
        self.resolution.push(step.into());
        self
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.component, self.message)
    }
}
