//! Isolation environments running package-manager work away from the host
//!
//! Two interchangeable implementations sit behind [`IsolationEnvironment`]:
//!
//! - [`native::NativeEnvironment`]: a child process in a scratch directory
//! - [`container::ContainerEnvironment`]: a disposable docker/podman image
//!
//! Both copy the group manifest and the probe executable into a run-scoped
//! directory, invoke `graviton-probe run-installer` there, and read the JSON
//! result file it writes (falling back to stdout). Every directory and image
//! they create is released exactly once by `cleanup`, unless preserved for
//! debugging.

pub mod container;
pub mod dockerfile;
pub mod error;
pub mod native;
pub mod output;
pub mod process;
pub mod workdir;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::PREREQUISITE_TIMEOUT_SECS;
use crate::ecosystem::Ecosystem;
use crate::isolation::error::IsolationError;
use crate::isolation::output::{
    find_result_file, persist_result_file, read_result_file, resolve_output,
};
use crate::isolation::process::{CommandOutput, CommandSpec, ProcessRunner};

/// Name of the probe executable inside a work directory
pub const INSTALLER_BINARY_NAME: &str = "graviton-probe";

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v?(\d+\.\d+(?:\.\d+)?)").expect("version regex is valid"));

#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    /// Base name of the result file instead of the manifest stem
    pub sbom_name: Option<String>,
    /// Permanent directory receiving a copy of the result file
    pub output_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrerequisiteStatus {
    pub satisfied: bool,
    pub missing: Vec<String>,
    /// Version reported by the ecosystem's primary tool
    pub runtime_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Result file content, or stdout when no result file was produced
    pub output: String,
    /// Descriptor of the runtime the analysis ran on
    pub environment: String,
    pub execution_time_secs: f64,
    pub output_file: Option<PathBuf>,
    pub error: Option<String>,
}

/// What a cleanup pass released
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub directories_removed: usize,
    pub images_removed: usize,
    /// Directories and images left in place for debugging
    pub preserved: Vec<String>,
}

#[async_trait::async_trait]
pub trait IsolationEnvironment: Send {
    /// Short name used in logs ("native", "container")
    fn kind(&self) -> &'static str;

    async fn check_prerequisites(&mut self, ecosystem: Ecosystem) -> PrerequisiteStatus;

    /// Runs the installer for one ecosystem. Command failures and timeouts
    /// come back as an unsuccessful [`ExecutionResult`]; `Err` means the
    /// workspace itself could not be prepared.
    async fn execute_analysis(
        &mut self,
        ecosystem: Ecosystem,
        manifest_path: &Path,
        options: &AnalysisOptions,
    ) -> Result<ExecutionResult, IsolationError>;

    async fn cleanup(&mut self, preserve_for_debug: bool) -> CleanupReport;
}

/// Extracts a dotted version number from `--version` output
pub fn extract_tool_version(output: &str) -> Option<String> {
    VERSION_RE
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Checks that `tool` is on PATH and answers `--version` with exit code 0.
/// Returns the combined version output on success.
pub async fn probe_tool(runner: &dyn ProcessRunner, tool: &str) -> Option<String> {
    runner.resolve(tool)?;
    let spec = CommandSpec::new(tool, Duration::from_secs(PREREQUISITE_TIMEOUT_SECS))
        .arg("--version");
    match runner.run(&spec).await {
        Ok(output) if output.succeeded() => Some(output.combined()),
        Ok(output) => {
            debug!("{} --version exited with {:?}", tool, output.exit_code);
            None
        }
        Err(e) => {
            debug!("{} --version failed: {}", tool, e);
            None
        }
    }
}

/// Copies the manifest into `dir`, returning its file name
pub(crate) fn stage_manifest(manifest_path: &Path, dir: &Path) -> Result<String, IsolationError> {
    let file_name = manifest_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| IsolationError::InvalidManifest(manifest_path.display().to_string()))?
        .to_string();
    std::fs::copy(manifest_path, dir.join(&file_name))?;
    Ok(file_name)
}

/// Copies the installer executable into `dir`
pub(crate) fn stage_installer(installer: &Path, dir: &Path) -> Result<PathBuf, IsolationError> {
    let destination = dir.join(INSTALLER_BINARY_NAME);
    std::fs::copy(installer, &destination)?;
    Ok(destination)
}

pub(crate) struct RunContext<'a> {
    pub ecosystem: Ecosystem,
    pub work_dir: &'a Path,
    pub expected_output: &'a Path,
    pub environment: String,
    pub timeout: Duration,
    pub options: &'a AnalysisOptions,
    /// Accept any `*_<ecosystem>_analysis.json` when the expected file is missing
    pub search_alternatives: bool,
}

/// A run that never produced installer output
pub(crate) fn failed_execution(
    environment: String,
    message: String,
    elapsed: Duration,
) -> ExecutionResult {
    warn!("{}", message);
    ExecutionResult {
        success: false,
        exit_code: None,
        stdout: String::new(),
        stderr: message.clone(),
        output: String::new(),
        environment,
        execution_time_secs: elapsed.as_secs_f64(),
        output_file: None,
        error: Some(message),
    }
}

/// Turns a finished (or failed) installer run into an [`ExecutionResult`]
pub(crate) fn finish_execution(
    ctx: RunContext<'_>,
    run: Result<CommandOutput, IsolationError>,
    elapsed: Duration,
) -> ExecutionResult {
    let output = match run {
        Ok(output) => output,
        Err(e) => {
            let message = if e.is_timeout() {
                format!(
                    "{} analysis timed out after {} seconds",
                    ctx.ecosystem,
                    ctx.timeout.as_secs()
                )
            } else {
                e.to_string()
            };
            return failed_execution(ctx.environment, message, elapsed);
        }
    };

    let success = output
        .exit_code
        .is_some_and(|code| ctx.ecosystem.success_codes().contains(&code));

    let result_path = if ctx.expected_output.exists() {
        Some(ctx.expected_output.to_path_buf())
    } else if ctx.search_alternatives {
        find_result_file(ctx.work_dir, ctx.ecosystem)
    } else {
        None
    };
    let result_content = result_path.as_deref().and_then(read_result_file);
    if result_content.is_none() {
        debug!(
            "No result file for {}, using stdout ({} bytes)",
            ctx.ecosystem,
            output.stdout.len()
        );
    }

    let output_file = match (&result_path, &ctx.options.output_dir) {
        (Some(path), Some(dir)) if success => persist_result_file(path, dir),
        _ => result_path.clone(),
    };

    let error = (!success).then(|| {
        format!(
            "{} analysis exited with {:?}: {}",
            ctx.ecosystem,
            output.exit_code,
            output.stderr.trim()
        )
    });

    ExecutionResult {
        success,
        exit_code: output.exit_code,
        output: resolve_output(result_content, &output.stdout),
        stdout: output.stdout,
        stderr: output.stderr,
        environment: ctx.environment,
        execution_time_secs: elapsed.as_secs_f64(),
        output_file,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("Python 3.11.4", Some("3.11.4"))]
    #[case("v20.11.1", Some("20.11.1"))]
    #[case("openjdk version \"17.0.9\" 2023-10-17", Some("17.0.9"))]
    #[case("no digits here", None)]
    fn extract_tool_version_finds_dotted_numbers(
        #[case] output: &str,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(extract_tool_version(output).as_deref(), expected);
    }

    fn output(exit_code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(exit_code),
            stdout: stdout.to_string(),
            stderr: "warn".to_string(),
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn finish_execution_prefers_result_file_over_stdout() {
        let dir = TempDir::new().unwrap();
        let expected = dir.path().join("python").join("m_python_analysis.json");
        std::fs::create_dir_all(expected.parent().unwrap()).unwrap();
        std::fs::write(&expected, "[{\"from\":\"file\"}]").unwrap();
        let options = AnalysisOptions::default();

        let result = finish_execution(
            RunContext {
                ecosystem: Ecosystem::Python,
                work_dir: dir.path(),
                expected_output: &expected,
                environment: "python_3.11".to_string(),
                timeout: Duration::from_secs(300),
                options: &options,
                search_alternatives: false,
            },
            Ok(output(0, "[]")),
            Duration::from_secs(1),
        );

        assert!(result.success);
        assert_eq!(result.output, "[{\"from\":\"file\"}]");
        assert_eq!(result.output_file, Some(expected));
    }

    #[test]
    fn finish_execution_accepts_java_exit_code_two() {
        let dir = TempDir::new().unwrap();
        let expected = dir.path().join("java").join("pom_java_analysis.json");
        let options = AnalysisOptions::default();

        let result = finish_execution(
            RunContext {
                ecosystem: Ecosystem::Java,
                work_dir: dir.path(),
                expected_output: &expected,
                environment: "java_17".to_string(),
                timeout: Duration::from_secs(300),
                options: &options,
                search_alternatives: false,
            },
            Ok(output(2, "[]")),
            Duration::from_secs(1),
        );

        assert!(result.success);
        assert_eq!(result.output, "[]");
        assert_eq!(result.error, None);
    }

    #[test]
    fn finish_execution_reports_timeouts() {
        let dir = TempDir::new().unwrap();
        let expected = dir.path().join("x.json");
        let options = AnalysisOptions::default();

        let result = finish_execution(
            RunContext {
                ecosystem: Ecosystem::Ruby,
                work_dir: dir.path(),
                expected_output: &expected,
                environment: "ruby_3.2".to_string(),
                timeout: Duration::from_secs(300),
                options: &options,
                search_alternatives: false,
            },
            Err(IsolationError::Timeout {
                command: "graviton-probe".to_string(),
                timeout_secs: 300,
            }),
            Duration::from_secs(300),
        );

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("ruby analysis timed out after 300 seconds")
        );
    }

    #[test]
    fn finish_execution_copies_result_into_output_dir() {
        let dir = TempDir::new().unwrap();
        let expected = dir.path().join("nodejs").join("m_nodejs_analysis.json");
        std::fs::create_dir_all(expected.parent().unwrap()).unwrap();
        std::fs::write(&expected, "[]").unwrap();
        let reports = dir.path().join("reports");
        let options = AnalysisOptions {
            output_dir: Some(reports.clone()),
            ..Default::default()
        };

        let result = finish_execution(
            RunContext {
                ecosystem: Ecosystem::NodeJs,
                work_dir: dir.path(),
                expected_output: &expected,
                environment: "nodejs_20".to_string(),
                timeout: Duration::from_secs(300),
                options: &options,
                search_alternatives: false,
            },
            Ok(output(0, "")),
            Duration::from_secs(1),
        );

        assert_eq!(
            result.output_file,
            Some(reports.join("m_nodejs_analysis.json"))
        );
        assert!(reports.join("m_nodejs_analysis.json").exists());
    }
}
