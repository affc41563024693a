//! Result types shared by the orchestrator, the isolation layer and the merger

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ecosystem::Ecosystem;

/// Confidence assigned to results backed by a real install attempt
pub const RUNTIME_CONFIDENCE: f64 = 0.9;

/// ARM64 compatibility verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum CompatibilityStatus {
    Compatible,
    Incompatible,
    NeedsUpgrade,
    NeedsVerification,
    NeedsVersionVerification,
    Unknown,
}

impl CompatibilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityStatus::Compatible => "compatible",
            CompatibilityStatus::Incompatible => "incompatible",
            CompatibilityStatus::NeedsUpgrade => "needs_upgrade",
            CompatibilityStatus::NeedsVerification => "needs_verification",
            CompatibilityStatus::NeedsVersionVerification => "needs_version_verification",
            CompatibilityStatus::Unknown => "unknown",
        }
    }

    /// Parses a status string, coercing anything unrecognized to `Unknown`
    pub fn parse_lenient(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "compatible" => CompatibilityStatus::Compatible,
            "incompatible" => CompatibilityStatus::Incompatible,
            "needs_upgrade" => CompatibilityStatus::NeedsUpgrade,
            "needs_verification" => CompatibilityStatus::NeedsVerification,
            "needs_version_verification" => CompatibilityStatus::NeedsVersionVerification,
            "unknown" => CompatibilityStatus::Unknown,
            other => {
                warn!("Unexpected compatibility status '{}', using unknown", other);
                CompatibilityStatus::Unknown
            }
        }
    }

    /// Whether the declared version itself is usable on ARM64
    pub fn supports_current_version(&self) -> bool {
        matches!(
            self,
            CompatibilityStatus::Compatible | CompatibilityStatus::NeedsVerification
        )
    }
}

impl From<String> for CompatibilityStatus {
    fn from(value: String) -> Self {
        CompatibilityStatus::parse_lenient(&value)
    }
}

impl std::fmt::Display for CompatibilityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A package at a specific version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub version: String,
    pub ecosystem: Ecosystem,
    /// Install evidence (install_status, native_build_detected, error_details, ...)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub properties: IndexMap<String, String>,
}

impl Component {
    pub fn new(name: impl Into<String>, version: impl Into<String>, ecosystem: Ecosystem) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ecosystem,
            properties: IndexMap::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<String>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub status: CompatibilityStatus,
    #[serde(default)]
    pub current_version_supported: bool,
    #[serde(default)]
    pub minimum_supported_version: Option<String>,
    #[serde(default)]
    pub recommended_version: Option<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default, rename = "confidence_level")]
    pub confidence: f64,
}

impl CompatibilityResult {
    pub fn new(status: CompatibilityStatus, notes: impl Into<String>) -> Self {
        Self {
            status,
            current_version_supported: status.supports_current_version(),
            minimum_supported_version: None,
            recommended_version: None,
            notes: notes.into(),
            confidence: RUNTIME_CONFIDENCE,
        }
    }

    pub fn with_recommended(mut self, version: impl Into<String>) -> Self {
        self.recommended_version = Some(version.into());
        self
    }

    pub fn with_minimum(mut self, version: impl Into<String>) -> Self {
        self.minimum_supported_version = Some(version.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Final verdict for one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentResult {
    #[serde(flatten)]
    pub component: Component,
    pub compatibility: CompatibilityResult,
}

impl ComponentResult {
    pub fn new(component: Component, compatibility: CompatibilityResult) -> Self {
        Self {
            component,
            compatibility,
        }
    }

    /// Identity used when merging result sets
    pub fn key(&self) -> (Ecosystem, &str, &str) {
        (
            self.component.ecosystem,
            &self.component.name,
            &self.component.version,
        )
    }

    pub fn status(&self) -> CompatibilityStatus {
        self.compatibility.status
    }
}

/// Per-status counts over a result set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub compatible: usize,
    pub incompatible: usize,
    pub needs_upgrade: usize,
    pub needs_verification: usize,
    pub needs_version_verification: usize,
    pub unknown: usize,
}

impl StatusCounts {
    pub fn from_results(results: &[ComponentResult]) -> Self {
        let mut counts = StatusCounts::default();
        for result in results {
            counts.total += 1;
            match result.status() {
                CompatibilityStatus::Compatible => counts.compatible += 1,
                CompatibilityStatus::Incompatible => counts.incompatible += 1,
                CompatibilityStatus::NeedsUpgrade => counts.needs_upgrade += 1,
                CompatibilityStatus::NeedsVerification => counts.needs_verification += 1,
                CompatibilityStatus::NeedsVersionVerification => {
                    counts.needs_version_verification += 1
                }
                CompatibilityStatus::Unknown => counts.unknown += 1,
            }
        }
        counts
    }
}
