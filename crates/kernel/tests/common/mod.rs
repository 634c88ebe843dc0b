#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Common test utilities for integration tests.
//!
//! Fixtures here use the real kernel code against files on disk: a local
//! package index and plugin manifests written into a temporary directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary directory holding a local index and plugin manifests.
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `index.toml` with the given `[packages]` body and return its path.
    pub fn write_index(&self, packages: &str) -> PathBuf {
        let path = self.dir.path().join("index.toml");
        std::fs::write(&path, format!("[packages]\n{packages}\n")).unwrap();
        path
    }

    /// Write `{id}.plugin.toml` and return its path.
    pub fn write_manifest(&self, id: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(format!("{id}.plugin.toml"));
        std::fs::write(&path, body).unwrap();
        path
    }
}

/// Package listing used across tests: the versions a typical Spark
/// environment would publish.
pub const SPARK_PACKAGES: &str = r#"
delta-spark = ["1.9.0"]
pyiceberg = ["0.5.1", "0.6.0"]
pyarrow = ["8.0.0", "9.0.0"]
hudi-spark = ["0.14.0", "0.15.0"]
"#;
