//! Installer adapter seam used by the version tester

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::ecosystem::Ecosystem;
use crate::isolation::error::IsolationError;
use crate::isolation::process::{CommandOutput, CommandSpec, ProcessRunner};
use crate::orchestrator::native_build::NativeBuild;
use crate::orchestrator::sorting::compare_versions;

/// What one install attempt produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOutcome {
    pub success: bool,
    /// Installer stdout (or merged output for tools that interleave)
    pub output: String,
    /// Error text: stderr, or a description of why the command never finished
    pub error: String,
    /// Version the package manager actually installed, when it said so
    pub resolved_version: Option<String>,
    /// Directory holding the installed files, for native-file inspection
    pub artifact_dir: Option<PathBuf>,
}

impl InstallOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }

    /// Error text, falling back to stdout when stderr was empty
    pub fn failure_text(&self) -> &str {
        if self.error.trim().is_empty() {
            &self.output
        } else {
            &self.error
        }
    }
}

/// One package manager, driven version by version
#[async_trait::async_trait]
pub trait PackageInstaller: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    /// Installs `package` at `version`, or unpinned when `version` is `None`
    async fn attempt_install(&self, package: &str, version: Option<&str>) -> InstallOutcome;

    async fn detect_native_build(&self, package: &str, outcome: &InstallOutcome) -> NativeBuild;

    /// Removes the artifact installed by the previous attempt. Failures are
    /// logged and ignored.
    async fn uninstall(&self, package: &str, version: Option<&str>);
}

/// Runs an install command, turning spawn errors and timeouts into failed
/// outcomes.
pub(crate) async fn run_install(runner: &dyn ProcessRunner, spec: &CommandSpec) -> InstallOutcome {
    match runner.run(spec).await {
        Ok(output) => from_output(output),
        Err(e) if e.is_timeout() => {
            warn!("{} timed out", spec.display());
            InstallOutcome::failed(format!(
                "Installation timed out after {} seconds",
                spec.timeout.as_secs()
            ))
        }
        Err(e) => {
            warn!("{} failed: {}", spec.display(), e);
            InstallOutcome::failed(format!("Installation failed: {}", e))
        }
    }
}

fn from_output(output: CommandOutput) -> InstallOutcome {
    InstallOutcome {
        success: output.succeeded(),
        output: output.stdout,
        error: output.stderr,
        resolved_version: None,
        artifact_dir: None,
    }
}

/// Runs a cleanup command, logging instead of failing
pub(crate) async fn run_cleanup(runner: &dyn ProcessRunner, spec: &CommandSpec) {
    match runner.run(spec).await {
        Ok(output) => debug!(
            "Cleanup `{}` exited with {:?}",
            spec.display(),
            output.exit_code
        ),
        Err(IsolationError::Timeout { .. }) => warn!("Cleanup `{}` timed out", spec.display()),
        Err(e) => debug!("Cleanup `{}` failed (ignoring): {}", spec.display(), e),
    }
}

/// Names of the version directories below a package's cache directory,
/// lowest first
pub(crate) fn installed_versions(package_dir: &Path) -> Vec<String> {
    let mut versions: Vec<String> = std::fs::read_dir(package_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    versions.sort_by(|a, b| compare_versions(a, b));
    versions
}

/// Version from a `Successfully installed a-1.0 b-2.0` line (pip, gem)
pub fn extract_installed_version(output: &str, package: &str) -> Option<String> {
    let prefix = format!("{}-", package.to_lowercase());
    output
        .lines()
        .filter(|line| line.contains("Successfully installed"))
        .flat_map(str::split_whitespace)
        .find_map(|part| {
            let head = part.get(..prefix.len())?;
            let version = part.get(prefix.len()..)?;
            (head.eq_ignore_ascii_case(&prefix) && version.starts_with(|c: char| c.is_ascii_digit()))
                .then(|| version.to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::process::MockProcessRunner;
    use rstest::rstest;
    use std::time::Duration;

    #[rstest]
    #[case("Successfully installed numpy-1.26.4", "numpy", Some("1.26.4"))]
    #[case("Successfully installed MarkupSafe-2.1.5 jinja2-3.1.3", "jinja2", Some("3.1.3"))]
    #[case("Successfully installed markupsafe-2.1.5", "MarkupSafe", Some("2.1.5"))]
    #[case("Successfully installed nokogiri-1.16.2-aarch64-linux", "nokogiri", Some("1.16.2-aarch64-linux"))]
    #[case("Successfully installed numpy-financial-1.0.0", "numpy", None)]
    #[case("Requirement already satisfied: numpy", "numpy", None)]
    fn extract_installed_version_from_success_line(
        #[case] output: &str,
        #[case] package: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            extract_installed_version(output, package).as_deref(),
            expected
        );
    }

    #[tokio::test]
    async fn run_install_converts_timeout_into_failure() {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|spec| {
            Err(IsolationError::Timeout {
                command: spec.program.clone(),
                timeout_secs: 120,
            })
        });
        let spec = CommandSpec::new("pip", Duration::from_secs(120));

        let outcome = run_install(&runner, &spec).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error, "Installation timed out after 120 seconds");
    }

    #[test]
    fn failure_text_prefers_stderr() {
        let outcome = InstallOutcome {
            output: "stdout".to_string(),
            error: "stderr".to_string(),
            ..Default::default()
        };
        assert_eq!(outcome.failure_text(), "stderr");

        let quiet = InstallOutcome {
            output: "stdout".to_string(),
            ..Default::default()
        };
        assert_eq!(quiet.failure_text(), "stdout");
    }

    #[test]
    fn installed_versions_sorts_directories_numerically() {
        let dir = tempfile::TempDir::new().unwrap();
        for version in ["13.0.3", "9.0.1", "13.0.10"] {
            std::fs::create_dir_all(dir.path().join(version)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        assert_eq!(
            installed_versions(dir.path()),
            vec!["9.0.1", "13.0.3", "13.0.10"]
        );
        assert!(installed_versions(&dir.path().join("missing")).is_empty());
    }
}
