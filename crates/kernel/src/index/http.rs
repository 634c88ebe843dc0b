//! Remote package index speaking the PyPI-style JSON API.
//!
//! `GET {base}/{name}/json` returns an object whose `releases` keys are the
//! published versions.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use semver::Version;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{ConnectError, IndexError, PackageIndex, parse_listing};

#[derive(Debug, Deserialize)]
struct ProjectListing {
    #[serde(default)]
    releases: HashMap<String, serde_json::Value>,
}

/// HTTP client for a JSON package index.
#[derive(Debug, Clone)]
pub struct HttpPackageIndex {
    base: Url,
    client: reqwest::Client,
}

impl HttpPackageIndex {
    pub fn new(mut base: Url, timeout: Duration) -> Result<Self, ConnectError> {
        // `Url::join` replaces the last segment unless the path ends in '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectError::new(base.as_str(), e))?;

        Ok(Self { base, client })
    }

    fn project_url(&self, name: &str) -> Result<Url, IndexError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(IndexError::not_found(name));
        }

        self.base
            .join(&format!("{name}/json"))
            .map_err(|e| IndexError::unavailable(name, e))
    }
}

#[async_trait]
impl PackageIndex for HttpPackageIndex {
    async fn lookup(&self, name: &str) -> Result<Vec<Version>, IndexError> {
        let url = self.project_url(name)?;
        debug!(package = %name, %url, "querying package index");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IndexError::unavailable(name, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(IndexError::not_found(name)),
            status if !status.is_success() => {
                return Err(IndexError::unavailable(
                    name,
                    format!("index returned HTTP {status}"),
                ));
            }
            _ => {}
        }

        let listing: ProjectListing = response
            .json()
            .await
            .map_err(|e| IndexError::unavailable(name, e))?;

        Ok(parse_listing(name, listing.releases.keys().map(String::as_str)))
    }

    fn source(&self) -> String {
        self.base.to_string()
    }
}
