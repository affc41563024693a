//! PyPI JSON API client

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::ecosystem::Ecosystem;
use crate::registry::error::RegistryError;
use crate::registry::{MetadataClient, PackageMetadata};

const DEFAULT_PYPI_REGISTRY: &str = "https://pypi.org";

/// PyPI registry client
pub struct PypiClient {
    client: Client,
    base_url: String,
}

impl Default for PypiClient {
    fn default() -> Self {
        Self::new(DEFAULT_PYPI_REGISTRY.to_string())
    }
}

impl PypiClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PypiResponse {
    info: PypiInfo,
    /// Files of the latest release
    #[serde(default)]
    urls: Vec<PypiFile>,
}

#[derive(Debug, Deserialize)]
struct PypiInfo {
    version: String,
}

#[derive(Debug, Deserialize)]
struct PypiFile {
    filename: String,
}

impl PypiFile {
    fn is_arm64_wheel(&self) -> bool {
        self.filename.ends_with(".whl")
            && (self.filename.contains("aarch64") || self.filename.contains("arm64"))
    }

    /// Wheels tagged anything but `none-any` carry compiled code
    fn is_platform_wheel(&self) -> bool {
        self.filename.ends_with(".whl") && !self.filename.ends_with("-none-any.whl")
    }
}

#[async_trait]
impl MetadataClient for PypiClient {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Python
    }

    async fn fetch_metadata(&self, package_name: &str) -> Result<PackageMetadata, RegistryError> {
        let url = format!("{}/pypi/{}/json", self.base_url, package_name);
        debug!("Fetching PyPI package: {}", url);

        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(package_name.to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(RegistryError::RateLimited { retry_after_secs });
        }

        if !response.status().is_success() {
            return Err(RegistryError::InvalidResponse(format!(
                "PyPI API returned status {}",
                response.status()
            )));
        }

        let pypi_response: PypiResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::InvalidResponse(e.to_string()))?;

        Ok(PackageMetadata {
            name: package_name.to_string(),
            latest_version: Some(pypi_response.info.version),
            arm64_artifacts: pypi_response.urls.iter().any(PypiFile::is_arm64_wheel),
            platform_specific: pypi_response.urls.iter().any(PypiFile::is_platform_wheel),
        })
    }
}
