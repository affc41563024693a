//! Registry metadata clients
//!
//! Metadata lookups are always made through [`fetch_metadata_gated`], which
//! consults the governor cache first and respects the registry's rate limit.

pub mod error;
pub mod npm;
pub mod pypi;

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::NEGATIVE_CACHE_TTL_HOURS;
use crate::ecosystem::Ecosystem;
use crate::governor::Governor;
use crate::registry::error::RegistryError;

/// What a registry tells us about a package's ARM64 story
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMetadata {
    pub name: String,
    pub latest_version: Option<String>,
    /// At least one published artifact targets arm64/aarch64
    #[serde(default)]
    pub arm64_artifacts: bool,
    /// Published artifacts are platform specific (wheels, prebuilt addons)
    #[serde(default)]
    pub platform_specific: bool,
}

impl PackageMetadata {
    fn unresolved(name: &str) -> Self {
        Self {
            name: name.to_string(),
            latest_version: None,
            arm64_artifacts: false,
            platform_specific: false,
        }
    }
}

/// Trait for fetching package metadata from a registry
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait MetadataClient: Send + Sync {
    /// Returns the ecosystem this client serves
    fn ecosystem(&self) -> Ecosystem;

    async fn fetch_metadata(&self, package_name: &str) -> Result<PackageMetadata, RegistryError>;
}

/// Returns the metadata client for an ecosystem, if one exists
pub fn client_for(ecosystem: Ecosystem) -> Option<Arc<dyn MetadataClient>> {
    match ecosystem {
        Ecosystem::Python => Some(Arc::new(pypi::PypiClient::default())),
        Ecosystem::NodeJs => Some(Arc::new(npm::NpmClient::default())),
        _ => None,
    }
}

/// Cache-first, rate-limited metadata lookup.
///
/// Failures are logged and yield `None`. Lookups that resolve nothing are
/// cached with a short TTL so a missing package is not refetched for every
/// declared version.
pub async fn fetch_metadata_gated(
    governor: &Governor,
    client: &dyn MetadataClient,
    package_name: &str,
) -> Option<PackageMetadata> {
    let ecosystem = client.ecosystem();

    if let Some(cached) = governor.get_cached(ecosystem, package_name, None) {
        match serde_json::from_value::<PackageMetadata>(cached) {
            Ok(metadata) => {
                debug!("Cache hit for {}/{}", ecosystem, package_name);
                return Some(metadata);
            }
            Err(e) => debug!(
                "Ignoring malformed cache entry for {}/{}: {}",
                ecosystem, package_name, e
            ),
        }
    }

    governor.wait_for_rate_limit(ecosystem).await;

    let (metadata, success) = match client.fetch_metadata(package_name).await {
        Ok(metadata) => (metadata, true),
        Err(RegistryError::NotFound(_)) => {
            debug!("Package not found: {}/{}", ecosystem, package_name);
            (PackageMetadata::unresolved(package_name), true)
        }
        Err(e) => {
            error!(
                "Failed to fetch metadata for {}/{}: {}",
                ecosystem, package_name, e
            );
            governor.record_request(ecosystem, false);
            return None;
        }
    };
    governor.record_request(ecosystem, success);

    let ttl_hours = metadata
        .latest_version
        .is_none()
        .then_some(NEGATIVE_CACHE_TTL_HOURS);
    match serde_json::to_value(&metadata) {
        Ok(value) => governor.set_cached(ecosystem, package_name, value, None, ttl_hours),
        Err(e) => warn!("Failed to serialize metadata for {}: {}", package_name, e),
    }

    Some(metadata)
}
