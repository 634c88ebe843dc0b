//! Lakebench Kernel Library
//!
//! Plugin dependency resolution and compatibility engine. The `lakebench`
//! binary is a thin CLI over [`plugin::DependencyManager`] and
//! [`plugin::PluginRegistry`].

pub mod cache;
pub mod config;
pub mod index;
pub mod plugin;
pub mod version;
