//! Version inheritance testing
//!
//! Declared versions of a package are installed lowest first until one works.
//! Everything above the working version inherits its verdict without being
//! installed, and everything below it is told to upgrade. When nothing
//! works, the unpinned latest release is installed exactly once.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::ecosystem::Ecosystem;
use crate::governor::Governor;
use crate::model::{CompatibilityResult, CompatibilityStatus, Component, ComponentResult};
use crate::orchestrator::diagnostics::{classify_error, extract_error_details};
use crate::orchestrator::installer::{InstallOutcome, PackageInstaller};
use crate::orchestrator::manifest::{GroupManifest, PackageVersionGroup};
use crate::orchestrator::native_build::NativeBuild;
use crate::orchestrator::sorting::{LATEST, sort_versions};
use crate::registry::{MetadataClient, fetch_metadata_gated};

/// Reported when neither the installer nor the registry names the latest version
const UNKNOWN_VERSION: &str = "unknown";

struct Attempt {
    outcome: InstallOutcome,
    native: NativeBuild,
}

struct Working {
    version: String,
    native: NativeBuild,
}

struct Failure {
    /// Position of the failed version's result
    index: usize,
    version: String,
    error: String,
}

enum FailureVerdict<'a> {
    Upgrade {
        to: &'a str,
        fallback_used: bool,
        notes: String,
    },
    Incompatible {
        fallback_used: bool,
        notes: String,
    },
}

/// Runs the inheritance algorithm for one ecosystem through its installer
pub struct VersionTester {
    installer: Box<dyn PackageInstaller>,
    registry: Option<(Arc<Governor>, Arc<dyn MetadataClient>)>,
}

impl VersionTester {
    pub fn new(installer: Box<dyn PackageInstaller>) -> Self {
        Self {
            installer,
            registry: None,
        }
    }

    /// Looks up registry metadata (cache-first, rate limited) before testing
    /// each package; the registry's latest version names the fallback when
    /// the installer output does not.
    pub fn with_registry(
        mut self,
        governor: Arc<Governor>,
        client: Arc<dyn MetadataClient>,
    ) -> Self {
        self.registry = Some((governor, client));
        self
    }

    pub fn ecosystem(&self) -> Ecosystem {
        self.installer.ecosystem()
    }

    /// Tests every package of the manifest, one after another
    pub async fn test_manifest(&self, manifest: &GroupManifest) -> Vec<ComponentResult> {
        let mut results = Vec::new();
        for (i, group) in manifest.packages.iter().enumerate() {
            info!(
                "Processing package {}/{}: {}",
                i + 1,
                manifest.packages.len(),
                group.name
            );
            results.extend(self.test_group(group).await);
        }
        info!(
            "{} analysis complete: {} results",
            self.ecosystem(),
            results.len()
        );
        results
    }

    /// One result per declared version, plus an entry for the resolved
    /// latest version when the fallback install found one.
    pub async fn test_group(&self, group: &PackageVersionGroup) -> Vec<ComponentResult> {
        let package = group.name.as_str();
        let sorted = sort_versions(&group.versions);
        debug!(
            "Testing {} versions {:?} (latest declared: {})",
            package, sorted.concrete, sorted.has_latest
        );

        let registry_latest = self.registry_latest(package).await;

        let mut results: Vec<ComponentResult> = Vec::new();
        let mut failures: Vec<Failure> = Vec::new();
        let mut working: Option<Working> = None;

        for version in &sorted.concrete {
            if let Some(working) = &working {
                results.push(self.inherited_result(package, version, working));
                continue;
            }

            let attempt = self.install(package, Some(version)).await;
            if attempt.outcome.success {
                info!("Installed {}@{}", package, version);
                for failure in &failures {
                    results[failure.index] = self.failure_result(
                        package,
                        failure,
                        FailureVerdict::Upgrade {
                            to: version,
                            fallback_used: false,
                            notes: format!(
                                "Version {} failed, but version {} works",
                                failure.version, version
                            ),
                        },
                    );
                }
                results.push(self.success_result(package, version, &attempt));
                working = Some(Working {
                    version: version.clone(),
                    native: attempt.native,
                });
            } else {
                let failure = Failure {
                    index: results.len(),
                    version: version.clone(),
                    error: attempt.outcome.failure_text().to_string(),
                };
                warn!(
                    "Failed to install {}@{}: {}",
                    package,
                    version,
                    extract_error_details(&failure.error)
                );
                results.push(self.failure_result(
                    package,
                    &failure,
                    FailureVerdict::Incompatible {
                        fallback_used: false,
                        notes: format!("Version {} failed to install", version),
                    },
                ));
                failures.push(failure);
            }
        }

        match &working {
            Some(working) => {
                if sorted.has_latest {
                    results.push(self.inherited_latest_result(package, working));
                }
            }
            None if failures.is_empty() && !sorted.has_latest => {}
            None => {
                self.latest_fallback(
                    package,
                    sorted.has_latest,
                    &sorted.concrete,
                    &failures,
                    registry_latest,
                    &mut results,
                )
                .await;
            }
        }
        results
    }

    async fn latest_fallback(
        &self,
        package: &str,
        latest_declared: bool,
        declared: &[String],
        failures: &[Failure],
        registry_latest: Option<String>,
        results: &mut Vec<ComponentResult>,
    ) {
        info!("No declared version of {} works, trying latest", package);
        let attempt = self.install(package, None).await;

        if attempt.outcome.success {
            let resolved = attempt
                .outcome
                .resolved_version
                .clone()
                .or(registry_latest)
                .unwrap_or_else(|| UNKNOWN_VERSION.to_string());
            info!("Latest {} ({}) works", package, resolved);

            for failure in failures {
                results[failure.index] = self.failure_result(
                    package,
                    failure,
                    FailureVerdict::Upgrade {
                        to: &resolved,
                        fallback_used: true,
                        notes: format!(
                            "Version {} failed, but latest version {} works",
                            failure.version, resolved
                        ),
                    },
                );
            }

            let entry_version = if latest_declared
                || resolved == UNKNOWN_VERSION
                || declared.contains(&resolved)
            {
                LATEST
            } else {
                resolved.as_str()
            };
            results.push(self.latest_success_result(package, entry_version, &resolved, &attempt));
        } else {
            warn!("Latest {} also failed to install", package);
            for failure in failures {
                results[failure.index] = self.failure_result(
                    package,
                    failure,
                    FailureVerdict::Incompatible {
                        fallback_used: true,
                        notes: format!(
                            "Version {} failed; all versions including latest failed",
                            failure.version
                        ),
                    },
                );
            }
            if latest_declared {
                results.push(self.latest_failed_result(package, &attempt.outcome));
            }
        }
    }

    /// Install, inspect, then uninstall the exact artifact
    async fn install(&self, package: &str, version: Option<&str>) -> Attempt {
        let outcome = self.installer.attempt_install(package, version).await;
        let native = if outcome.success {
            self.installer.detect_native_build(package, &outcome).await
        } else {
            NativeBuild::No
        };
        debug!(
            "{}@{} success={} native={}",
            package,
            version.unwrap_or(LATEST),
            outcome.success,
            native
        );

        if self.ecosystem().is_critical_package(package) {
            debug!("Skipping uninstall of critical package {}", package);
        } else {
            let installed = outcome.resolved_version.as_deref().or(version);
            self.installer.uninstall(package, installed).await;
        }

        Attempt { outcome, native }
    }

    async fn registry_latest(&self, package: &str) -> Option<String> {
        let (governor, client) = self.registry.as_ref()?;
        fetch_metadata_gated(governor, client.as_ref(), package)
            .await?
            .latest_version
    }

    fn component(
        &self,
        package: &str,
        version: &str,
        install_status: &str,
        native: NativeBuild,
        fallback_used: bool,
    ) -> Component {
        Component::new(package, version, self.ecosystem())
            .with_property("install_status", install_status)
            .with_property("native_build_detected", native.as_str())
            .with_property("fallback_used", fallback_used.to_string())
            .with_property("runtime_analysis", "true")
    }

    fn success_result(&self, package: &str, version: &str, attempt: &Attempt) -> ComponentResult {
        let notes = format!(
            "Successfully installed {}=={}{}",
            package,
            version,
            match attempt.native {
                NativeBuild::NeedsVerification => {
                    " (x86-only native files detected - requires ARM64 verification)"
                }
                NativeBuild::Yes => " (ARM64 native compilation successful)",
                NativeBuild::No => "",
            }
        );
        ComponentResult::new(
            self.component(package, version, "Success", attempt.native, false)
                .with_property("test_output", attempt.outcome.output.trim()),
            CompatibilityResult::new(verdict_for(attempt.native), notes).with_minimum(version),
        )
    }

    fn inherited_result(&self, package: &str, version: &str, working: &Working) -> ComponentResult {
        ComponentResult::new(
            self.component(package, version, "Inherited", working.native, false),
            CompatibilityResult::new(
                CompatibilityStatus::Compatible,
                format!(
                    "Compatible (inherited from working version {})",
                    working.version
                ),
            )
            .with_minimum(&working.version),
        )
    }

    fn inherited_latest_result(&self, package: &str, working: &Working) -> ComponentResult {
        ComponentResult::new(
            self.component(package, LATEST, "Inherited", working.native, false),
            CompatibilityResult::new(
                CompatibilityStatus::Compatible,
                format!(
                    "Latest version likely compatible (working version {} found)",
                    working.version
                ),
            )
            .with_minimum(&working.version),
        )
    }

    fn latest_success_result(
        &self,
        package: &str,
        entry_version: &str,
        resolved: &str,
        attempt: &Attempt,
    ) -> ComponentResult {
        let notes = format!(
            "Latest version {} works{}",
            resolved,
            match attempt.native {
                NativeBuild::NeedsVerification => " (x86-only native files detected)",
                NativeBuild::Yes => " (ARM64 native compilation successful)",
                NativeBuild::No => "",
            }
        );
        let mut compatibility = CompatibilityResult::new(verdict_for(attempt.native), notes);
        if resolved != UNKNOWN_VERSION {
            compatibility = compatibility.with_minimum(resolved);
        }
        ComponentResult::new(
            self.component(package, entry_version, "Success", attempt.native, true)
                .with_property("resolved_version", resolved)
                .with_property("test_output", attempt.outcome.output.trim()),
            compatibility,
        )
    }

    fn latest_failed_result(&self, package: &str, outcome: &InstallOutcome) -> ComponentResult {
        let error = outcome.failure_text();
        ComponentResult::new(
            self.component(package, LATEST, "Failed", NativeBuild::No, true)
                .with_property("error_details", extract_error_details(error))
                .with_property("error_type", classify_error(error).as_str())
                .with_property("test_output", error.trim()),
            CompatibilityResult::new(
                CompatibilityStatus::Incompatible,
                "Latest version also failed to install",
            ),
        )
    }

    fn failure_result(
        &self,
        package: &str,
        failure: &Failure,
        verdict: FailureVerdict<'_>,
    ) -> ComponentResult {
        // A version that never installed has no native build of its own
        let (fallback_used, compatibility) = match verdict {
            FailureVerdict::Upgrade {
                to,
                fallback_used,
                notes,
            } => {
                let mut compatibility =
                    CompatibilityResult::new(CompatibilityStatus::NeedsUpgrade, notes)
                        .with_recommended(to);
                if to != UNKNOWN_VERSION {
                    compatibility = compatibility.with_minimum(to);
                }
                (fallback_used, compatibility)
            }
            FailureVerdict::Incompatible {
                fallback_used,
                notes,
            } => (
                fallback_used,
                CompatibilityResult::new(CompatibilityStatus::Incompatible, notes),
            ),
        };

        ComponentResult::new(
            self.component(
                package,
                &failure.version,
                "Failed",
                NativeBuild::No,
                fallback_used,
            )
                .with_property("error_details", extract_error_details(&failure.error))
                .with_property("error_type", classify_error(&failure.error).as_str())
                .with_property("test_output", failure.error.trim()),
            compatibility,
        )
    }
}

fn verdict_for(native: NativeBuild) -> CompatibilityStatus {
    match native {
        NativeBuild::NeedsVerification => CompatibilityStatus::NeedsVerification,
        NativeBuild::Yes | NativeBuild::No => CompatibilityStatus::Compatible,
    }
}
