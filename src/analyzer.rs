//! Runtime analysis pipeline
//!
//! [`RuntimeAnalyzer`] drives one isolation environment over a
//! [`PackageGroups`] document, one ecosystem at a time. A failing ecosystem
//! is reported and skipped; the environment is cleaned up once at the end.
//! [`static_results`] produces the knowledge-base verdicts the runtime
//! results are merged over.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::ecosystem::Ecosystem;
use crate::isolation::{AnalysisOptions, CleanupReport, ExecutionResult, IsolationEnvironment};
use crate::merge::parse_runtime_components;
use crate::model::{CompatibilityResult, CompatibilityStatus, Component, ComponentResult};
use crate::orchestrator::error::ManifestError;
use crate::orchestrator::manifest::PackageGroups;
use crate::orchestrator::sorting::LATEST;

/// Confidence assigned to knowledge-base verdicts
pub const STATIC_CONFIDENCE: f64 = 0.7;

/// File name of the group manifest handed to the environment
const MANIFEST_FILE_NAME: &str = "packages.json";

/// Static compatibility knowledge for one package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeBaseEntry {
    pub status: CompatibilityStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub minimum_supported_version: Option<String>,
    #[serde(default)]
    pub recommended_version: Option<String>,
}

/// Source of static compatibility verdicts
pub trait KnowledgeBase: Send + Sync {
    fn lookup(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        version: Option<&str>,
    ) -> Option<KnowledgeBaseEntry>;
}

#[derive(Debug, Clone, Deserialize)]
struct KnowledgeBaseRecord {
    ecosystem: Ecosystem,
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(flatten)]
    entry: KnowledgeBaseEntry,
}

/// Knowledge base loaded from a JSON list of
/// `{"ecosystem", "name", "version"?, "status", "notes", ...}` records.
/// Records without a version apply to every version of the package.
#[derive(Debug, Clone, Default)]
pub struct JsonKnowledgeBase {
    entries: HashMap<(Ecosystem, String), Vec<(Option<String>, KnowledgeBaseEntry)>>,
}

impl JsonKnowledgeBase {
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        let records: Vec<KnowledgeBaseRecord> = serde_json::from_str(content)?;
        let mut entries: HashMap<(Ecosystem, String), Vec<_>> = HashMap::new();
        for record in records {
            entries
                .entry((record.ecosystem, record.name.to_lowercase()))
                .or_default()
                .push((record.version, record.entry));
        }
        Ok(Self { entries })
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}

impl KnowledgeBase for JsonKnowledgeBase {
    fn lookup(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        version: Option<&str>,
    ) -> Option<KnowledgeBaseEntry> {
        let records = self.entries.get(&(ecosystem, name.to_lowercase()))?;
        let exact = version.and_then(|v| {
            records
                .iter()
                .find(|(record_version, _)| record_version.as_deref() == Some(v))
        });
        exact
            .or_else(|| records.iter().find(|(record_version, _)| record_version.is_none()))
            .map(|(_, entry)| entry.clone())
    }
}

/// One static result per declared version. Every spelling of the latest
/// marker is reported as `latest`, once per package; packages the knowledge
/// base does not know are `Unknown`.
pub fn static_results(
    knowledge_base: &dyn KnowledgeBase,
    groups: &PackageGroups,
) -> Vec<ComponentResult> {
    let mut results = Vec::new();
    for ecosystem in groups.ecosystems() {
        for group in groups.manifest_for(ecosystem).packages {
            let mut seen: Vec<&str> = Vec::new();
            for declared in &group.versions {
                let is_latest = declared.eq_ignore_ascii_case(LATEST);
                let version = if is_latest { LATEST } else { declared.as_str() };
                if seen.contains(&version) {
                    continue;
                }
                seen.push(version);

                let lookup_version = (!is_latest).then_some(version);
                let entry = knowledge_base.lookup(ecosystem, &group.name, lookup_version);
                let compatibility = match entry {
                    Some(entry) => {
                        let mut compatibility = CompatibilityResult::new(entry.status, entry.notes)
                            .with_confidence(STATIC_CONFIDENCE);
                        compatibility.minimum_supported_version = entry.minimum_supported_version;
                        compatibility.recommended_version = entry.recommended_version;
                        compatibility
                    }
                    None => CompatibilityResult::new(
                        CompatibilityStatus::Unknown,
                        "No compatibility information available",
                    )
                    .with_confidence(0.0),
                };
                results.push(ComponentResult::new(
                    Component::new(&group.name, version, ecosystem),
                    compatibility,
                ));
            }
        }
    }
    results
}

/// Outcome of one ecosystem's isolated run
#[derive(Debug, Clone, Serialize)]
pub struct EcosystemReport {
    pub ecosystem: Ecosystem,
    pub components: Vec<ComponentResult>,
    pub execution: Option<ExecutionResult>,
    pub error: Option<String>,
}

impl EcosystemReport {
    fn failed(ecosystem: Ecosystem, error: String) -> Self {
        Self {
            ecosystem,
            components: Vec::new(),
            execution: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeAnalysis {
    pub reports: Vec<EcosystemReport>,
    pub cleanup: CleanupReport,
}

impl RuntimeAnalysis {
    pub fn components(&self) -> Vec<ComponentResult> {
        self.reports
            .iter()
            .flat_map(|report| report.components.iter().cloned())
            .collect()
    }

    /// Records each failed ecosystem's error on its baseline results.
    /// Results without a static verdict take the error as their note.
    pub fn annotate_failures(&self, baseline: &mut [ComponentResult]) {
        for report in &self.reports {
            let Some(error) = &report.error else {
                continue;
            };
            for result in baseline
                .iter_mut()
                .filter(|result| result.component.ecosystem == report.ecosystem)
            {
                result
                    .component
                    .properties
                    .insert("runtime_error".to_string(), error.clone());
                if result.status() == CompatibilityStatus::Unknown {
                    result.compatibility.notes = format!("Runtime analysis failed: {}", error);
                }
            }
        }
    }
}

pub struct RuntimeAnalyzer {
    environment: Box<dyn IsolationEnvironment>,
    options: AnalysisOptions,
    preserve_for_debug: bool,
}

impl RuntimeAnalyzer {
    pub fn new(environment: Box<dyn IsolationEnvironment>) -> Self {
        Self {
            environment,
            options: AnalysisOptions::default(),
            preserve_for_debug: false,
        }
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    pub fn preserve_for_debug(mut self, preserve: bool) -> Self {
        self.preserve_for_debug = preserve;
        self
    }

    pub async fn analyze(&mut self, groups: &PackageGroups) -> RuntimeAnalysis {
        let ecosystems = groups.ecosystems();
        info!(
            "Starting {} runtime analysis for {} ecosystems",
            self.environment.kind(),
            ecosystems.len()
        );

        let mut reports = Vec::with_capacity(ecosystems.len());
        for ecosystem in ecosystems {
            let report = self.analyze_ecosystem(groups, ecosystem).await;
            if let Some(error) = &report.error {
                warn!("{} analysis failed: {}", ecosystem, error);
            }
            reports.push(report);
        }

        let cleanup = self.environment.cleanup(self.preserve_for_debug).await;
        info!(
            "Cleanup removed {} directories and {} images ({} preserved)",
            cleanup.directories_removed,
            cleanup.images_removed,
            cleanup.preserved.len()
        );

        RuntimeAnalysis { reports, cleanup }
    }

    async fn analyze_ecosystem(
        &mut self,
        groups: &PackageGroups,
        ecosystem: Ecosystem,
    ) -> EcosystemReport {
        let prerequisites = self.environment.check_prerequisites(ecosystem).await;
        if !prerequisites.satisfied {
            return EcosystemReport::failed(
                ecosystem,
                format!(
                    "Missing prerequisites for {}: {}",
                    ecosystem,
                    prerequisites.missing.join(", ")
                ),
            );
        }

        let manifest_dir = match tempfile::Builder::new()
            .prefix(&format!("graviton_manifest_{}_", ecosystem))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                return EcosystemReport::failed(
                    ecosystem,
                    format!("Failed to create manifest directory: {}", e),
                );
            }
        };
        let manifest_path = manifest_dir.path().join(MANIFEST_FILE_NAME);
        if let Err(e) = groups.manifest_for(ecosystem).write(&manifest_path) {
            return EcosystemReport::failed(ecosystem, e.to_string());
        }

        let execution = match self
            .environment
            .execute_analysis(ecosystem, &manifest_path, &self.options)
            .await
        {
            Ok(execution) => execution,
            Err(e) => {
                error!("{} environment setup failed: {}", ecosystem, e);
                return EcosystemReport::failed(ecosystem, e.to_string());
            }
        };
        if let Ok(json) = serde_json::to_string(&execution) {
            debug!("{} execution result: {}", ecosystem, json);
        }

        let components = parse_runtime_components(&execution.output, ecosystem);
        let error = if execution.success {
            None
        } else {
            Some(execution.error.clone().unwrap_or_else(|| {
                format!("Analysis exited with code {:?}", execution.exit_code)
            }))
        };
        info!(
            "{} analysis produced {} results on {}",
            ecosystem,
            components.len(),
            execution.environment
        );

        EcosystemReport {
            ecosystem,
            components,
            execution: Some(execution),
            error,
        }
    }
}
