//! Plugin system for Lakebench.
//!
//! This module handles:
//! - Parsing plugin metadata from `.plugin.toml` manifests
//! - Validating plugin dependencies against the package index
//! - Resolving compatibility across a set of plugins
//! - The plugin registry and its lifecycle state machine

mod dependency;
mod error;
mod manifest;
mod registry;
mod status;

pub use dependency::{DependencyManager, resolve_load_order};
pub use error::{PluginError, ResolutionError};
pub use manifest::{MANIFEST_SUFFIX, collect_manifests, parse_manifest, parse_manifest_str};
pub use registry::{BatchFailure, BatchReport, PluginEntry, PluginRegistry, RegistrationOutcome};
pub use status::{can_transition, check_transition};
