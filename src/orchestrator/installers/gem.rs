use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{PREREQUISITE_TIMEOUT_SECS, UNINSTALL_TIMEOUT_SECS};
use crate::ecosystem::Ecosystem;
use crate::isolation::process::{CommandSpec, ProcessRunner};
use crate::orchestrator::installer::{
    InstallOutcome, PackageInstaller, extract_installed_version, run_cleanup, run_install,
};
use crate::orchestrator::native_build::{NativeBuild, detect_native_build};

/// `gem install <name>:<version> --no-document`
pub struct GemInstaller {
    runner: Arc<dyn ProcessRunner>,
}

impl GemInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Installed gem directory, located through `gem which`
    async fn gem_dir(&self, package: &str) -> Option<PathBuf> {
        let spec = CommandSpec::new("gem", Duration::from_secs(PREREQUISITE_TIMEOUT_SECS))
            .args(["which", package]);
        let output = self.runner.run(&spec).await.ok()?;
        if !output.succeeded() {
            return None;
        }
        // <gem_dir>/lib/<file>.rb
        PathBuf::from(output.stdout.lines().next()?.trim())
            .ancestors()
            .find(|dir| dir.file_name().is_some_and(|name| name == "lib"))
            .and_then(|lib| lib.parent())
            .map(PathBuf::from)
            .filter(|dir| dir.is_dir())
    }
}

#[async_trait::async_trait]
impl PackageInstaller for GemInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Ruby
    }

    async fn attempt_install(&self, package: &str, version: Option<&str>) -> InstallOutcome {
        let gem_spec = match version {
            Some(version) => format!("{}:{}", package, version),
            None => package.to_string(),
        };
        let spec = CommandSpec::new("gem", Ecosystem::Ruby.install_timeout())
            .args(["install", gem_spec.as_str(), "--no-document"]);

        let mut outcome = run_install(self.runner.as_ref(), &spec).await;
        if outcome.success {
            outcome.resolved_version = extract_installed_version(&outcome.output, package);
            outcome.artifact_dir = self.gem_dir(package).await;
        }
        outcome
    }

    async fn detect_native_build(&self, _package: &str, outcome: &InstallOutcome) -> NativeBuild {
        detect_native_build(
            self.runner.as_ref(),
            Ecosystem::Ruby,
            &outcome.output,
            outcome.artifact_dir.as_deref(),
        )
        .await
    }

    async fn uninstall(&self, package: &str, version: Option<&str>) {
        let mut spec = CommandSpec::new("gem", Duration::from_secs(UNINSTALL_TIMEOUT_SECS))
            .args(["uninstall", package]);
        if let Some(version) = version {
            spec = spec.args(["-v", version]);
        }
        run_cleanup(self.runner.as_ref(), &spec.args(["-x", "-I"])).await;
    }
}
