use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::{PREREQUISITE_TIMEOUT_SECS, UNINSTALL_TIMEOUT_SECS};
use crate::ecosystem::Ecosystem;
use crate::isolation::process::{CommandSpec, ProcessRunner};
use crate::orchestrator::installer::{
    InstallOutcome, PackageInstaller, extract_installed_version, run_cleanup, run_install,
};
use crate::orchestrator::native_build::{NativeBuild, detect_native_build};

const SITE_PACKAGES_SCRIPT: &str = "import site; print(site.getsitepackages()[0])";

/// `pip install <name>==<version> --force-reinstall`
pub struct PipInstaller {
    runner: Arc<dyn ProcessRunner>,
    pip: String,
    site_packages: OnceCell<Option<PathBuf>>,
}

impl PipInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        let pip = if runner.resolve("pip3").is_some() {
            "pip3"
        } else {
            "pip"
        };
        Self {
            runner,
            pip: pip.to_string(),
            site_packages: OnceCell::new(),
        }
    }

    /// Skips asking the interpreter where packages are installed
    pub fn with_site_packages(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            site_packages: OnceCell::new_with(Some(Some(dir.into()))),
            ..self
        }
    }

    async fn site_packages(&self) -> Option<&PathBuf> {
        self.site_packages
            .get_or_init(|| async {
                let spec = CommandSpec::new(
                    "python3",
                    Duration::from_secs(PREREQUISITE_TIMEOUT_SECS),
                )
                .args(["-c", SITE_PACKAGES_SCRIPT]);
                match self.runner.run(&spec).await {
                    Ok(output) if output.succeeded() => {
                        Some(PathBuf::from(output.stdout.trim())).filter(|p| p.is_dir())
                    }
                    _ => {
                        debug!("Could not determine site-packages directory");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    async fn package_dir(&self, package: &str) -> Option<PathBuf> {
        let site_packages = self.site_packages().await?;
        [package.to_string(), package.replace('-', "_")]
            .into_iter()
            .map(|name| site_packages.join(name))
            .find(|dir| dir.is_dir())
    }
}

#[async_trait::async_trait]
impl PackageInstaller for PipInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Python
    }

    async fn attempt_install(&self, package: &str, version: Option<&str>) -> InstallOutcome {
        let requirement = match version {
            Some(version) => format!("{}=={}", package, version),
            None => package.to_string(),
        };
        let spec = CommandSpec::new(&self.pip, Ecosystem::Python.install_timeout())
            .args(["install", requirement.as_str(), "--force-reinstall"]);

        let mut outcome = run_install(self.runner.as_ref(), &spec).await;
        if outcome.success {
            outcome.resolved_version = extract_installed_version(&outcome.output, package);
            outcome.artifact_dir = self.package_dir(package).await;
        }
        outcome
    }

    async fn detect_native_build(&self, _package: &str, outcome: &InstallOutcome) -> NativeBuild {
        detect_native_build(
            self.runner.as_ref(),
            Ecosystem::Python,
            &outcome.output,
            outcome.artifact_dir.as_deref(),
        )
        .await
    }

    async fn uninstall(&self, package: &str, _version: Option<&str>) {
        let spec = CommandSpec::new(&self.pip, Duration::from_secs(UNINSTALL_TIMEOUT_SECS))
            .args(["uninstall", package, "-y"]);
        run_cleanup(self.runner.as_ref(), &spec).await;
    }
}
