use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::config::UNINSTALL_TIMEOUT_SECS;
use crate::ecosystem::Ecosystem;
use crate::isolation::process::{CommandSpec, ProcessRunner};
use crate::orchestrator::installer::{InstallOutcome, PackageInstaller, run_cleanup, run_install};
use crate::orchestrator::native_build::{NativeBuild, detect_native_build};

#[derive(Deserialize)]
struct InstalledManifest {
    version: Option<String>,
}

/// `npm install <name>@<version>` into a private prefix directory.
/// Lifecycle scripts are disabled so nothing from the package runs.
pub struct NpmInstaller {
    runner: Arc<dyn ProcessRunner>,
    prefix: PathBuf,
}

impl NpmInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>, prefix: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            prefix: prefix.into(),
        }
    }

    fn module_dir(&self, package: &str) -> PathBuf {
        self.prefix.join("node_modules").join(package)
    }
}

/// Version from `+ name@1.2.3` or `name@1.2.3` lines
fn extract_npm_version(output: &str, package: &str) -> Option<String> {
    let marker = format!("{}@", package);
    output.lines().map(str::trim).find_map(|line| {
        let start = line.find(&marker)? + marker.len();
        line[start..]
            .split_whitespace()
            .next()
            .filter(|version| version.starts_with(|c: char| c.is_ascii_digit()))
            .map(str::to_string)
    })
}

fn read_installed_version(module_dir: &Path) -> Option<String> {
    let content = std::fs::read_to_string(module_dir.join("package.json")).ok()?;
    serde_json::from_str::<InstalledManifest>(&content)
        .inspect_err(|e| debug!("Unreadable package.json in {:?}: {}", module_dir, e))
        .ok()?
        .version
}

#[async_trait::async_trait]
impl PackageInstaller for NpmInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::NodeJs
    }

    async fn attempt_install(&self, package: &str, version: Option<&str>) -> InstallOutcome {
        if let Err(e) = std::fs::create_dir_all(&self.prefix) {
            return InstallOutcome::failed(format!("Installation failed: {}", e));
        }
        let spec_arg = match version {
            Some(version) => format!("{}@{}", package, version),
            None => package.to_string(),
        };
        let spec = CommandSpec::new("npm", Ecosystem::NodeJs.install_timeout())
            .args([
                "install",
                spec_arg.as_str(),
                "--no-save",
                "--no-optional",
                "--ignore-scripts",
            ])
            .current_dir(&self.prefix);

        let mut outcome = run_install(self.runner.as_ref(), &spec).await;
        if outcome.success {
            let module_dir = self.module_dir(package);
            outcome.resolved_version = extract_npm_version(&outcome.output, package)
                .or_else(|| read_installed_version(&module_dir));
            outcome.artifact_dir = module_dir.is_dir().then_some(module_dir);
        }
        outcome
    }

    async fn detect_native_build(&self, _package: &str, outcome: &InstallOutcome) -> NativeBuild {
        detect_native_build(
            self.runner.as_ref(),
            Ecosystem::NodeJs,
            &outcome.output,
            outcome.artifact_dir.as_deref(),
        )
        .await
    }

    async fn uninstall(&self, package: &str, _version: Option<&str>) {
        let spec = CommandSpec::new("npm", Duration::from_secs(UNINSTALL_TIMEOUT_SECS))
            .args(["uninstall", package, "--no-save"])
            .current_dir(&self.prefix);
        run_cleanup(self.runner.as_ref(), &spec).await;
    }
}
