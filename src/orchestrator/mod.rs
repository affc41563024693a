//! Version test orchestration, the code behind `run-installer`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ GroupManifest│────▶│ VersionTester│────▶│  Installer   │
//! │  (manifest)  │     │   (tester)   │     │(pip,npm,...) │
//! └──────────────┘     └──────────────┘     └──────────────┘
//!                             │                    │
//!                             ▼                    ▼
//!                      ┌──────────────┐     ┌──────────────┐
//!                      │   Governor   │     │ native_build │
//!                      │  (registry)  │     │ (file probe) │
//!                      └──────────────┘     └──────────────┘
//! ```
//!
//! # Modules
//!
//! - [`manifest`]: package groups and single-ecosystem manifests
//! - [`sorting`]: tolerant version ordering
//! - [`tester`]: version inheritance and the latest fallback
//! - [`installer`]: the `PackageInstaller` seam and shared command helpers
//! - [`installers`]: pip, npm, maven, nuget and gem adapters
//! - [`native_build`]: native-extension detection
//! - [`diagnostics`]: error excerpts and classification

pub mod diagnostics;
pub mod error;
pub mod installer;
pub mod installers;
pub mod manifest;
pub mod native_build;
pub mod sorting;
pub mod tester;

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::ecosystem::Ecosystem;
use crate::governor::Governor;
use crate::isolation::process::ProcessRunner;
use crate::model::{CompatibilityStatus, ComponentResult};
use crate::orchestrator::installers::installer_for;
use crate::orchestrator::manifest::GroupManifest;
use crate::orchestrator::tester::VersionTester;
use crate::registry::client_for;

/// Exit code reported by `run-installer` for Java when incompatible
/// dependencies were found
pub const INCOMPATIBLE_EXIT_CODE: i32 = 2;

/// Result file written by `run-installer`
#[derive(Debug, Clone, Serialize)]
pub struct InstallerReport {
    pub ecosystem: Ecosystem,
    pub components: Vec<ComponentResult>,
}

impl InstallerReport {
    pub fn has_incompatible(&self) -> bool {
        self.components
            .iter()
            .any(|r| r.status() == CompatibilityStatus::Incompatible)
    }

    pub fn exit_code(&self) -> i32 {
        if self.ecosystem == Ecosystem::Java && self.has_incompatible() {
            INCOMPATIBLE_EXIT_CODE
        } else {
            0
        }
    }
}

/// Tests every group of the manifest at `manifest_path` and writes the
/// report to `output_path`. Scratch projects live next to the manifest.
pub async fn run_installer(
    manifest_path: &Path,
    output_path: &Path,
    runner: Arc<dyn ProcessRunner>,
    governor: Option<Arc<Governor>>,
) -> anyhow::Result<InstallerReport> {
    let manifest = GroupManifest::load(manifest_path)?;
    let work_dir = manifest_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    info!(
        "Testing {} {} packages from {:?}",
        manifest.packages.len(),
        manifest.ecosystem,
        manifest_path
    );

    let mut tester = VersionTester::new(installer_for(manifest.ecosystem, runner, work_dir));
    if let (Some(governor), Some(client)) = (governor, client_for(manifest.ecosystem)) {
        tester = tester.with_registry(governor, client);
    }

    let report = InstallerReport {
        ecosystem: manifest.ecosystem,
        components: tester.test_manifest(&manifest).await,
    };

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output_path, serde_json::to_string_pretty(&report)?)?;
    info!("Wrote {} results to {:?}", report.components.len(), output_path);

    Ok(report)
}
