//! Lakebench Plugin SDK
//!
//! Plain data contracts between table-format plugins and the Lakebench
//! kernel. Plugin loaders describe a plugin with [`types::PluginMetadata`];
//! the kernel answers with [`types::ValidationResult`],
//! [`types::CompatibilityResult`] and [`diagnostics::StructuredError`]s.
//! Nothing in here executes plugin code.

pub mod diagnostics;
pub mod types;

// Re-export serde_json so callers can render results without a direct dependency
#[doc(hidden)]
pub use serde_json;

pub mod prelude {
    pub use crate::diagnostics::*;
    pub use crate::types::*;
}
