//! Package index backed by a local TOML file.
//!
//! ```toml
//! [packages]
//! delta-spark = ["1.9.0", "2.4.0", "3.1.0"]
//! pyarrow = ["10.0", "14.0.1"]
//! ```
//!
//! The file is re-read on every lookup so edits show up without a restart.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;

use super::{IndexError, PackageIndex, parse_listing};

#[derive(Debug, Default, Deserialize)]
struct IndexFile {
    #[serde(default)]
    packages: BTreeMap<String, Vec<String>>,
}

/// Offline index read from a TOML file.
#[derive(Debug, Clone)]
pub struct LocalPackageIndex {
    path: PathBuf,
}

impl LocalPackageIndex {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PackageIndex for LocalPackageIndex {
    async fn lookup(&self, name: &str) -> Result<Vec<Version>, IndexError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            IndexError::unavailable(name, format!("cannot read {}: {e}", self.path.display()))
        })?;

        let file: IndexFile = toml::from_str(&content).map_err(|e| {
            IndexError::unavailable(name, format!("cannot parse {}: {e}", self.path.display()))
        })?;

        let raw = file
            .packages
            .get(name)
            .ok_or_else(|| IndexError::not_found(name))?;

        Ok(parse_listing(name, raw.iter().map(String::as_str)))
    }

    fn source(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_versions_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[packages]\ndelta-spark = [\"1.9.0\", \"2.4.0\"]\npyarrow = [\"10.0\"]"
        )
        .unwrap();

        let index = LocalPackageIndex::new(file.path());
        let versions = index.lookup("delta-spark").await.unwrap();
        assert_eq!(versions, vec![Version::new(2, 4, 0), Version::new(1, 9, 0)]);

        let versions = index.lookup("pyarrow").await.unwrap();
        assert_eq!(versions, vec![Version::new(10, 0, 0)]);
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[packages]").unwrap();

        let index = LocalPackageIndex::new(file.path());
        assert_eq!(
            index.lookup("hudi-spark").await,
            Err(IndexError::not_found("hudi-spark"))
        );
    }

    #[tokio::test]
    async fn missing_file_is_unavailable() {
        let index = LocalPackageIndex::new("/nonexistent/lakebench/index.toml");
        let err = index.lookup("delta-spark").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
