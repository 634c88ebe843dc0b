//! Plugin lifecycle transitions.
//!
//! ```text
//! REGISTERED ──> INITIALIZING ──> ACTIVE
//!      ^              │              │
//!      │              v              │
//!      │            ERROR            │
//!      └─────────────────────────────┘  (deactivate)
//! ```
//!
//! ERROR is terminal for a registry instance.

use lakebench_sdk::types::PluginStatus;

use super::error::PluginError;

/// Whether the state machine allows moving from `from` to `to`.
pub fn can_transition(from: PluginStatus, to: PluginStatus) -> bool {
    use PluginStatus::*;
    matches!(
        (from, to),
        (Registered, Initializing) | (Initializing, Active) | (Initializing, Error) | (Active, Registered)
    )
}

/// Check a transition, returning `InvalidTransition` when it is not allowed.
pub fn check_transition(plugin: &str, from: PluginStatus, to: PluginStatus) -> Result<(), PluginError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(PluginError::invalid_transition(plugin, from, to))
    }
}
