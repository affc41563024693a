//! Package-group documents
//!
//! The driver reads a [`PackageGroups`] document keyed by ecosystem and hands
//! each isolated run a single-ecosystem [`GroupManifest`]:
//!
//! ```json
//! {"ecosystem": "python", "packages": [{"name": "numpy", "versions": ["1.21.0", "latest"]}]}
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ecosystem::Ecosystem;
use crate::orchestrator::error::ManifestError;

/// One package and every version the project declares for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersionGroup {
    pub name: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

impl PackageVersionGroup {
    pub fn new<S: Into<String>>(name: impl Into<String>, versions: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            versions: versions.into_iter().map(Into::into).collect(),
        }
    }
}

/// Merges groups sharing a name, keeping first-seen order
fn merge_groups(groups: Vec<PackageVersionGroup>) -> Vec<PackageVersionGroup> {
    let mut merged: Vec<PackageVersionGroup> = Vec::with_capacity(groups.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for group in groups {
        match index.get(&group.name) {
            Some(&i) => {
                for version in group.versions {
                    if !merged[i].versions.contains(&version) {
                        merged[i].versions.push(version);
                    }
                }
            }
            None => {
                index.insert(group.name.clone(), merged.len());
                merged.push(group);
            }
        }
    }
    merged
}

/// Manifest handed to `run-installer` inside an isolation environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupManifest {
    pub ecosystem: Ecosystem,
    #[serde(default)]
    pub packages: Vec<PackageVersionGroup>,
}

impl GroupManifest {
    pub fn new(ecosystem: Ecosystem, packages: Vec<PackageVersionGroup>) -> Self {
        Self {
            ecosystem,
            packages: merge_groups(packages),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        let manifest: GroupManifest = serde_json::from_str(&content)?;
        Ok(Self::new(manifest.ecosystem, manifest.packages))
    }

    pub fn write(&self, path: &Path) -> Result<(), ManifestError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Package groups for several ecosystems:
/// `{"python": [{"name": ..., "versions": [...]}], "nodejs": [...]}`.
/// Keys accept ecosystem and registry aliases (`npm`, `pypi`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageGroups {
    groups: BTreeMap<Ecosystem, Vec<PackageVersionGroup>>,
}

impl PackageGroups {
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let raw: BTreeMap<String, Vec<PackageVersionGroup>> = serde_json::from_str(content)?;
        let mut groups: BTreeMap<Ecosystem, Vec<PackageVersionGroup>> = BTreeMap::new();
        for (key, packages) in raw {
            let ecosystem = key
                .parse::<Ecosystem>()
                .map_err(|_| ManifestError::UnknownEcosystem(key.clone()))?;
            groups.entry(ecosystem).or_default().extend(packages);
        }
        Ok(Self { groups })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Ecosystems with at least one package, in a stable order
    pub fn ecosystems(&self) -> Vec<Ecosystem> {
        self.groups
            .iter()
            .filter(|(_, packages)| !packages.is_empty())
            .map(|(ecosystem, _)| *ecosystem)
            .collect()
    }

    pub fn manifest_for(&self, ecosystem: Ecosystem) -> GroupManifest {
        GroupManifest::new(
            ecosystem,
            self.groups.get(&ecosystem).cloned().unwrap_or_default(),
        )
    }
}
