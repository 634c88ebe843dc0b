//! Lakebench CLI
//!
//! Validates, resolves and registers table-format plugins from their
//! `.plugin.toml` manifests. Results are printed to stdout as JSON; logs go to
//! stderr.
//!
//! Usage:
//!   lakebench validate plugins/
//!   lakebench --index ./fixtures/index.toml resolve delta.plugin.toml iceberg.plugin.toml

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lakebench_kernel::config::Config;
use lakebench_kernel::index::IndexSource;
use lakebench_kernel::plugin::{
    DependencyManager, PluginRegistry, collect_manifests, parse_manifest, resolve_load_order,
};
use lakebench_sdk::types::PluginMetadata;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Package index URL or local index file (overrides LAKEBENCH_PACKAGE_INDEX).
    #[arg(long, global = true)]
    index: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate each plugin's dependencies against the package index.
    Validate {
        /// Manifest files or directories containing `*.plugin.toml`.
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
    /// Check a set of plugins for version conflicts and cycles.
    Resolve {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
    /// Register plugins in dependency order, stopping at the first failure.
    Register {
        #[arg(required = true)]
        manifests: Vec<PathBuf>,
    },
}

#[derive(Serialize)]
struct PluginValidation<'a> {
    plugin_id: &'a str,
    version: &'a str,
    #[serde(flatten)]
    result: lakebench_sdk::types::ValidationResult,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    let mut config = Config::from_env().context("failed to load configuration")?;
    if let Some(index) = &cli.index {
        config.dependency.package_index = IndexSource::parse(index);
    }
    info!(index = %config.dependency.package_index, "configuration loaded");

    let manager = DependencyManager::from_config(config.dependency.clone())
        .context("failed to set up package index")?;

    match cli.command {
        Command::Validate { manifests } => {
            let plugins = load_manifests(&manifests)?;
            let mut report = Vec::with_capacity(plugins.len());
            for plugin in &plugins {
                let result = manager.validate_dependencies(plugin).await;
                report.push(PluginValidation {
                    plugin_id: &plugin.id,
                    version: &plugin.version,
                    result,
                });
            }
            let all_valid = report.iter().all(|r| r.result.is_valid);
            print_json(&report)?;
            Ok(exit_code(all_valid))
        }
        Command::Resolve { manifests } => {
            let plugins = load_manifests(&manifests)?;
            match manager.resolve_dependencies(&plugins) {
                Ok(result) => {
                    print_json(&result)?;
                    Ok(exit_code(result.is_compatible))
                }
                Err(e) => {
                    print_json(&serde_json::json!({
                        "is_compatible": false,
                        "errors": e.errors,
                        "conflicts": e.conflicts,
                    }))?;
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Register { manifests } => {
            let plugins = load_manifests(&manifests)?;
            let order = resolve_load_order(&plugins).context("failed to order plugins")?;
            let mut by_id: std::collections::HashMap<String, PluginMetadata> = plugins
                .into_iter()
                .map(|plugin| (plugin.id.clone(), plugin))
                .collect();
            let ordered: Vec<PluginMetadata> =
                order.iter().filter_map(|id| by_id.remove(id)).collect();

            let registry = PluginRegistry::new(manager, config.registry);
            let report = registry.register_batch(ordered).await;
            print_json(&report)?;
            Ok(exit_code(report.is_complete()))
        }
    }
}

fn load_manifests(inputs: &[PathBuf]) -> Result<Vec<PluginMetadata>> {
    let paths = collect_manifests(inputs).context("failed to list manifests")?;
    paths
        .iter()
        .map(|path| parse_manifest(path).with_context(|| format!("failed to load {}", path.display())))
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
