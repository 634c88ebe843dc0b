//! Parser for plugin `.plugin.toml` manifest files.
//!
//! Each plugin ships a `{id}.plugin.toml` manifest declaring its metadata:
//!
//! ```toml
//! id = "delta-plugin"
//! name = "Delta Lake"
//! version = "1.0.0"
//! format = "delta"
//! capabilities = ["read", "write", "time_travel"]
//!
//! [dependencies]
//! delta-spark = ">=2.0.0,<4.0.0"
//! pyarrow = { version = ">=10.0", kind = "optional", scope = "test" }
//! ```
//!
//! A dependency given as a bare string is REQUIRED and RUNTIME.
//!
//! Ranges use semver comparators (`>=`, `<`, `^`, `~`, `*`, `==`). A bare
//! version such as `"2.4.0"` pins exactly. PEP 440 `!=` and `~=` are not
//! supported and make that dependency malformed; write `~=1.4` as
//! `>=1.4,<2.0`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use lakebench_sdk::types::{
    Capability, DependencyKind, DependencyScope, DependencySpec, FormatKind, PluginMetadata,
};
use serde::Deserialize;

use super::error::PluginError;
use crate::version::parse_version;

/// File suffix identifying plugin manifests inside a directory.
pub const MANIFEST_SUFFIX: &str = ".plugin.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    id: String,
    name: Option<String>,
    version: String,
    format: FormatKind,
    #[serde(default)]
    capabilities: BTreeSet<Capability>,
    #[serde(default)]
    dependencies: BTreeMap<String, DependencyEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DependencyEntry {
    Range(String),
    Detailed {
        version: String,
        #[serde(default)]
        kind: DependencyKind,
        #[serde(default)]
        scope: DependencyScope,
    },
}

/// Parse a plugin manifest from the given path.
pub fn parse_manifest(path: &Path) -> Result<PluginMetadata, PluginError> {
    let content = std::fs::read_to_string(path).map_err(|e| PluginError::ManifestUnreadable {
        path: path.display().to_string(),
        details: e.to_string(),
    })?;

    parse_manifest_str(&content, path)
}

/// Parse a plugin manifest from a TOML string.
pub fn parse_manifest_str(content: &str, path: &Path) -> Result<PluginMetadata, PluginError> {
    let invalid = |details: String| PluginError::InvalidManifest {
        path: path.display().to_string(),
        details,
    };

    let manifest: Manifest = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;

    if manifest.id.trim().is_empty() {
        return Err(invalid("empty 'id' field".into()));
    }
    parse_version(&manifest.version).map_err(|e| invalid(format!("'version': {e}")))?;

    let dependencies = manifest
        .dependencies
        .into_iter()
        .map(|(name, entry)| {
            if name.trim().is_empty() {
                return Err(invalid("dependency with empty name".into()));
            }
            let spec = match entry {
                DependencyEntry::Range(version_range) => DependencySpec::required(&name, version_range),
                DependencyEntry::Detailed {
                    version,
                    kind,
                    scope,
                } => DependencySpec {
                    name: name.clone(),
                    version_range: version,
                    kind,
                    scope,
                },
            };
            Ok((name, spec))
        })
        .collect::<Result<BTreeMap<_, _>, _>>()?;

    Ok(PluginMetadata {
        name: manifest.name.unwrap_or_else(|| manifest.id.clone()),
        id: manifest.id,
        version: manifest.version,
        format: manifest.format,
        dependencies,
        capabilities: manifest.capabilities,
    })
}

/// Expand inputs into manifest files.
///
/// Files are taken as given; directories contribute every `*.plugin.toml`
/// they contain, sorted by file name.
pub fn collect_manifests(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, PluginError> {
    let mut manifests = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            manifests.push(input.clone());
            continue;
        }

        let entries = std::fs::read_dir(input).map_err(|e| PluginError::ManifestUnreadable {
            path: input.display().to_string(),
            details: e.to_string(),
        })?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.ends_with(MANIFEST_SUFFIX))
            })
            .collect();
        found.sort();
        manifests.extend(found);
    }
    Ok(manifests)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let toml = r#"
id = "iceberg-plugin"
name = "Apache Iceberg"
version = "1.2.0"
format = "iceberg"
capabilities = ["read", "write", "schema_evolution"]

[dependencies]
pyiceberg = ">=0.5"
pyarrow = { version = ">=10.0", kind = "optional", scope = "test" }
"#;

        let meta = parse_manifest_str(toml, Path::new("iceberg.plugin.toml")).unwrap();
        assert_eq!(meta.id, "iceberg-plugin");
        assert_eq!(meta.name, "Apache Iceberg");
        assert_eq!(meta.format, FormatKind::Iceberg);
        assert!(meta.capabilities.contains(&Capability::SchemaEvolution));

        let pyiceberg = &meta.dependencies["pyiceberg"];
        assert_eq!(pyiceberg.kind, DependencyKind::Required);
        assert_eq!(pyiceberg.scope, DependencyScope::Runtime);

        let pyarrow = &meta.dependencies["pyarrow"];
        assert_eq!(pyarrow.version_range, ">=10.0");
        assert_eq!(pyarrow.kind, DependencyKind::Optional);
        assert_eq!(pyarrow.scope, DependencyScope::Test);
    }

    #[test]
    fn parse_minimal_manifest() {
        let toml = r#"
id = "lance-plugin"
version = "0.1.0"
format = "lance"
"#;

        let meta = parse_manifest_str(toml, Path::new("test.toml")).unwrap();
        assert_eq!(meta.name, "lance-plugin");
        assert_eq!(meta.format, FormatKind::Custom("lance".into()));
        assert!(meta.dependencies.is_empty());
        assert!(meta.capabilities.is_empty());
    }

    #[test]
    fn reject_unknown_capability() {
        let toml = r#"
id = "bad"
version = "1.0.0"
format = "delta"
capabilities = ["teleport"]
"#;

        let result = parse_manifest_str(toml, Path::new("bad.plugin.toml"));
        assert!(matches!(result, Err(PluginError::InvalidManifest { .. })));
    }

    #[test]
    fn reject_empty_id() {
        let toml = r#"
id = ""
version = "1.0.0"
format = "delta"
"#;

        let err = parse_manifest_str(toml, Path::new("test.toml")).unwrap_err();
        assert!(err.to_string().contains("empty 'id'"));
    }

    #[test]
    fn reject_non_semver_version() {
        let toml = r#"
id = "p"
version = "latest"
format = "hudi"
"#;

        let err = parse_manifest_str(toml, Path::new("test.toml")).unwrap_err();
        assert!(err.to_string().contains("'version'"));
    }

    #[test]
    fn malformed_dependency_range_is_kept_for_validation() {
        let toml = r#"
id = "p"
version = "1.0.0"
format = "hudi"

[dependencies]
hudi-spark = ">=banana"
"#;

        let meta = parse_manifest_str(toml, Path::new("test.toml")).unwrap();
        assert_eq!(meta.dependencies["hudi-spark"].version_range, ">=banana");
    }

    #[test]
    fn collect_reads_directories_and_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.plugin.toml"), "").unwrap();
        std::fs::write(dir.path().join("a.plugin.toml"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let extra = PathBuf::from("/somewhere/else.plugin.toml");

        let found = collect_manifests(&[dir.path().to_path_buf(), extra.clone()]).unwrap();
        assert_eq!(
            found,
            vec![
                dir.path().join("a.plugin.toml"),
                dir.path().join("b.plugin.toml"),
                extra
            ]
        );
    }

    #[test]
    fn unreadable_file_names_path() {
        let err = parse_manifest(Path::new("/nonexistent/x.plugin.toml")).unwrap_err();
        assert!(matches!(err, PluginError::ManifestUnreadable { .. }));
        assert!(err.to_string().contains("x.plugin.toml"));
    }
}
