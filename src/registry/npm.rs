//! npm registry API client

use std::collections::HashMap;

use semver::Version;
use serde::Deserialize;
use tracing::warn;

use crate::ecosystem::Ecosystem;
use crate::registry::error::RegistryError;
use crate::registry::{MetadataClient, PackageMetadata};

/// Default base URL for npm registry
const DEFAULT_BASE_URL: &str = "https://registry.npmjs.org";

#[derive(Debug, Deserialize)]
struct NpmPackageResponse {
    #[serde(rename = "dist-tags", default)]
    dist_tags: HashMap<String, String>,
    #[serde(default)]
    versions: HashMap<String, NpmVersionInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct NpmVersionInfo {
    #[serde(default)]
    cpu: Vec<String>,
    #[serde(default)]
    gypfile: bool,
    #[serde(default)]
    binary: Option<serde_json::Value>,
    #[serde(default, rename = "optionalDependencies")]
    optional_dependencies: HashMap<String, String>,
}

impl NpmVersionInfo {
    fn targets_arm64(&self) -> bool {
        self.cpu.iter().any(|c| c == "arm64")
            || self
                .optional_dependencies
                .keys()
                .any(|name| name.contains("arm64"))
    }

    fn is_native_addon(&self) -> bool {
        self.gypfile || self.binary.is_some()
    }
}

/// Client for the npm registry API
pub struct NpmClient {
    client: reqwest::Client,
    base_url: String,
}

impl NpmClient {
    /// Creates a new NpmClient with a custom base URL
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("graviton-probe")
                .build()
                .unwrap_or_default(),
            base_url: base_url.to_string(),
        }
    }

    /// Encode package name for URL (handles scoped packages)
    fn encode_package_name(package_name: &str) -> String {
        if package_name.starts_with('@') {
            package_name.replace('/', "%2F")
        } else {
            package_name.to_string()
        }
    }
}

impl Default for NpmClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

#[async_trait::async_trait]
impl MetadataClient for NpmClient {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::NodeJs
    }

    async fn fetch_metadata(&self, package_name: &str) -> Result<PackageMetadata, RegistryError> {
        let url = format!(
            "{}/{}",
            self.base_url,
            Self::encode_package_name(package_name)
        );

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(package_name.to_string()));
        }

        if !status.is_success() {
            warn!("npm registry returned status {}: {}", status, url);
            return Err(RegistryError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let package_info: NpmPackageResponse = response.json().await.map_err(|e| {
            warn!("Failed to parse npm registry response: {}", e);
            RegistryError::InvalidResponse(e.to_string())
        })?;

        // Prefer the latest dist-tag, fall back to the highest semver
        let latest = package_info.dist_tags.get("latest").cloned().or_else(|| {
            package_info
                .versions
                .keys()
                .filter_map(|v| Version::parse(v).ok().map(|parsed| (v, parsed)))
                .max_by(|(_, a), (_, b)| a.cmp(b))
                .map(|(v, _)| v.clone())
        });

        let latest_info = latest
            .as_ref()
            .and_then(|v| package_info.versions.get(v));

        Ok(PackageMetadata {
            name: package_name.to_string(),
            latest_version: latest.clone(),
            arm64_artifacts: latest_info.is_some_and(NpmVersionInfo::targets_arm64),
            platform_specific: latest_info.is_some_and(NpmVersionInfo::is_native_addon),
        })
    }
}
