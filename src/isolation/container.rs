//! Containerized isolation: each ecosystem runs inside a freshly built image

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{
    CONTAINER_RUN_TIMEOUT_SECS, IMAGE_BUILD_TIMEOUT_SECS, IMAGE_REMOVE_TIMEOUT_SECS,
    IsolationConfig,
};
use crate::ecosystem::Ecosystem;
use crate::isolation::dockerfile;
use crate::isolation::error::IsolationError;
use crate::isolation::output::{output_file_name, output_file_path};
use crate::isolation::process::{CommandSpec, ProcessRunner};
use crate::isolation::workdir::WorkDir;
use crate::isolation::{
    AnalysisOptions, CleanupReport, ExecutionResult, INSTALLER_BINARY_NAME, IsolationEnvironment,
    PrerequisiteStatus, RunContext, failed_execution, finish_execution, probe_tool,
    stage_installer, stage_manifest,
};

/// Container runtimes in order of preference
const CONTAINER_RUNTIMES: [&str; 2] = ["docker", "podman"];

pub struct ContainerEnvironment {
    runner: Arc<dyn ProcessRunner>,
    installer: PathBuf,
    config: IsolationConfig,
    temp_root: Option<PathBuf>,
    runtime: Option<String>,
    contexts: Vec<WorkDir>,
    images: Vec<String>,
}

impl ContainerEnvironment {
    pub fn new(runner: Arc<dyn ProcessRunner>, installer: PathBuf, config: IsolationConfig) -> Self {
        Self {
            runner,
            installer,
            config,
            temp_root: None,
            runtime: None,
            contexts: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Images built and not yet removed
    pub fn images(&self) -> &[String] {
        &self.images
    }

    async fn detect_runtime(&mut self) -> Option<String> {
        if self.runtime.is_none() {
            for candidate in CONTAINER_RUNTIMES {
                if probe_tool(self.runner.as_ref(), candidate).await.is_some() {
                    info!("Using container runtime: {}", candidate);
                    self.runtime = Some(candidate.to_string());
                    break;
                }
            }
        }
        self.runtime.clone()
    }

    fn environment_descriptor(&self, ecosystem: Ecosystem, runtime_version: &str) -> String {
        format!(
            "container_{}_{}_{}",
            ecosystem,
            runtime_version,
            dockerfile::os_tag(&self.config.os_version)
        )
    }

    fn analysis_command(ecosystem: Ecosystem, manifest_name: &str, file_name: &str) -> String {
        format!(
            "mkdir -p ./{eco} && ./{bin} run-installer \"{manifest}\" -o \"./{eco}/{file}\"",
            eco = ecosystem,
            bin = INSTALLER_BINARY_NAME,
            manifest = manifest_name,
            file = file_name
        )
    }
}

#[async_trait]
impl IsolationEnvironment for ContainerEnvironment {
    fn kind(&self) -> &'static str {
        "container"
    }

    async fn check_prerequisites(&mut self, ecosystem: Ecosystem) -> PrerequisiteStatus {
        let runtime = self.detect_runtime().await;
        PrerequisiteStatus {
            satisfied: runtime.is_some(),
            missing: match runtime {
                Some(_) => Vec::new(),
                None => vec!["docker or podman".to_string()],
            },
            runtime_version: Some(self.config.runtime_version(ecosystem)),
        }
    }

    async fn execute_analysis(
        &mut self,
        ecosystem: Ecosystem,
        manifest_path: &Path,
        options: &AnalysisOptions,
    ) -> Result<ExecutionResult, IsolationError> {
        let runtime = self
            .detect_runtime()
            .await
            .ok_or(IsolationError::NoContainerRuntime)?;

        let context = WorkDir::create(
            self.temp_root.as_deref(),
            &format!("graviton_docker_{}_", ecosystem),
        )?;
        let runtime_version = self.config.runtime_version(ecosystem);
        std::fs::write(
            context.path().join("Dockerfile"),
            dockerfile::generate(ecosystem, &runtime_version, &self.config.os_version),
        )?;
        let manifest_name = stage_manifest(manifest_path, context.path())?;
        stage_installer(&self.installer, context.path())?;

        let file_name = output_file_name(options.sbom_name.as_deref(), manifest_path, ecosystem);
        let expected_output = output_file_path(context.path(), ecosystem, &file_name);
        let image = dockerfile::image_name(ecosystem, &runtime_version, &self.config.os_version);
        let environment = self.environment_descriptor(ecosystem, &runtime_version);
        let start = Instant::now();

        info!("Building image {} for {} analysis", image, ecosystem);
        let build_spec = CommandSpec::new(&runtime, Duration::from_secs(IMAGE_BUILD_TIMEOUT_SECS))
            .args(["build", "-t", image.as_str()])
            .arg(context.path().to_string_lossy());
        let build_error = match self.runner.run(&build_spec).await {
            Ok(output) if output.succeeded() => {
                self.images.push(image.clone());
                None
            }
            Ok(output) => Some(format!(
                "Image build failed for {}: {}",
                image,
                output.stderr.trim()
            )),
            Err(e) if e.is_timeout() => Some(format!(
                "Image build for {} timed out after {} seconds",
                image, IMAGE_BUILD_TIMEOUT_SECS
            )),
            Err(e) => Some(e.to_string()),
        };
        if let Some(message) = build_error {
            self.contexts.push(context);
            return Ok(failed_execution(environment, message, start.elapsed()));
        }

        let timeout = Duration::from_secs(CONTAINER_RUN_TIMEOUT_SECS);
        let run_spec = CommandSpec::new(&runtime, timeout)
            .args(["run", "--rm", "-v"])
            .arg(format!("{}:/workspace", context.path().display()))
            .args(["-w", "/workspace", image.as_str(), "sh", "-c"])
            .arg(Self::analysis_command(ecosystem, &manifest_name, &file_name));
        debug!("Container command: {}", run_spec.display());
        let run = self.runner.run(&run_spec).await;

        let result = finish_execution(
            RunContext {
                ecosystem,
                work_dir: context.path(),
                expected_output: &expected_output,
                environment,
                timeout,
                options,
                search_alternatives: true,
            },
            run,
            start.elapsed(),
        );

        self.contexts.push(context);
        Ok(result)
    }

    async fn cleanup(&mut self, preserve_for_debug: bool) -> CleanupReport {
        let mut report = CleanupReport::default();

        if preserve_for_debug {
            info!(
                "Cleanup disabled: preserving {} build contexts and {} images",
                self.contexts.len(),
                self.images.len()
            );
            for image in self.images.drain(..) {
                info!("Preserved image: {}", image);
                report.preserved.push(image);
            }
        } else if let Some(runtime) = self.runtime.clone() {
            let removals = self.images.drain(..).map(|image| {
                let runner = self.runner.clone();
                let runtime = runtime.clone();
                async move {
                    let spec =
                        CommandSpec::new(runtime, Duration::from_secs(IMAGE_REMOVE_TIMEOUT_SECS))
                            .args(["rmi", "-f", image.as_str()]);
                    match runner.run(&spec).await {
                        Ok(output) if output.succeeded() => true,
                        Ok(output) => {
                            warn!("Failed to remove image {}: {}", image, output.stderr.trim());
                            false
                        }
                        Err(e) => {
                            warn!("Failed to remove image {}: {}", image, e);
                            false
                        }
                    }
                }
            });
            report.images_removed = join_all(removals)
                .await
                .into_iter()
                .filter(|removed| *removed)
                .count();
        }

        for context in self.contexts.drain(..) {
            match context.release(preserve_for_debug) {
                Ok(Some(path)) => report.preserved.push(path.display().to_string()),
                Ok(None) => report.directories_removed += 1,
                Err(e) => warn!("Failed to remove build context: {}", e),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::process::{CommandOutput, MockProcessRunner};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn output(exit_code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(exit_code),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        }
    }

    struct Fixture {
        root: TempDir,
        manifest: PathBuf,
        installer: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let manifest = root.path().join("groups.json");
        std::fs::write(&manifest, "{}").unwrap();
        let installer = root.path().join("probe-bin");
        std::fs::write(&installer, "bin").unwrap();
        Fixture {
            root,
            manifest,
            installer,
        }
    }

    /// Runner where only podman exists; records every subcommand
    fn podman_runner(calls: Arc<Mutex<Vec<Vec<String>>>>, build_exit: i32) -> MockProcessRunner {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_resolve()
            .returning(|tool| (tool == "podman").then(|| PathBuf::from("/usr/bin/podman")));
        runner.expect_run().returning(move |spec| {
            calls.lock().unwrap().push(spec.args.clone());
            match spec.args[0].as_str() {
                "--version" => Ok(output(0, "podman version 4.9.3")),
                "build" => Ok(output(build_exit, "")),
                "run" => Ok(output(0, "[]")),
                _ => Ok(output(0, "")),
            }
        });
        runner
    }

    #[test]
    fn analysis_command_writes_into_ecosystem_directory() {
        assert_eq!(
            ContainerEnvironment::analysis_command(
                Ecosystem::Java,
                "groups.json",
                "groups_java_analysis.json"
            ),
            "mkdir -p ./java && ./graviton-probe run-installer \"groups.json\" -o \"./java/groups_java_analysis.json\""
        );
    }

    #[tokio::test]
    async fn check_prerequisites_falls_back_to_podman() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut env = ContainerEnvironment::new(
            Arc::new(podman_runner(calls, 0)),
            PathBuf::from("probe"),
            IsolationConfig::default(),
        );

        let status = env.check_prerequisites(Ecosystem::Python).await;

        assert!(status.satisfied);
        assert_eq!(status.runtime_version.as_deref(), Some("3.11"));
        assert_eq!(env.runtime.as_deref(), Some("podman"));
    }

    #[tokio::test]
    async fn check_prerequisites_without_runtime_is_unsatisfied() {
        let mut runner = MockProcessRunner::new();
        runner.expect_resolve().returning(|_| None);
        let mut env = ContainerEnvironment::new(
            Arc::new(runner),
            PathBuf::from("probe"),
            IsolationConfig::default(),
        );

        let status = env.check_prerequisites(Ecosystem::Ruby).await;

        assert!(!status.satisfied);
        assert_eq!(status.missing, vec!["docker or podman".to_string()]);
    }

    #[tokio::test]
    async fn execute_analysis_builds_and_runs_image() {
        let fx = fixture();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut env = ContainerEnvironment::new(
            Arc::new(podman_runner(calls.clone(), 0)),
            fx.installer.clone(),
            IsolationConfig::default(),
        )
        .with_temp_root(fx.root.path().join("ctx"));

        let result = env
            .execute_analysis(Ecosystem::NodeJs, &fx.manifest, &AnalysisOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "[]");
        assert_eq!(result.environment, "container_nodejs_20_amazon-linux-2023");
        assert_eq!(
            env.images(),
            &["graviton-nodejs-analysis:20-amazon-linux-2023".to_string()]
        );

        let calls = calls.lock().unwrap();
        let run = calls.iter().find(|args| args[0] == "run").unwrap();
        assert_eq!(&run[1..3], &["--rm".to_string(), "-v".to_string()]);
        assert!(run[3].ends_with(":/workspace"));
        assert_eq!(run[6], "graviton-nodejs-analysis:20-amazon-linux-2023");
    }

    #[tokio::test]
    async fn failed_build_skips_run_and_creates_no_image() {
        let fx = fixture();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut env = ContainerEnvironment::new(
            Arc::new(podman_runner(calls.clone(), 1)),
            fx.installer.clone(),
            IsolationConfig::default(),
        )
        .with_temp_root(fx.root.path().join("ctx"));

        let result = env
            .execute_analysis(Ecosystem::Python, &fx.manifest, &AnalysisOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("Image build failed"));
        assert!(env.images().is_empty());
        assert!(!calls.lock().unwrap().iter().any(|args| args[0] == "run"));
    }

    #[tokio::test]
    async fn cleanup_removes_each_image_and_context_once() {
        let fx = fixture();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let ctx_root = fx.root.path().join("ctx");
        let mut env = ContainerEnvironment::new(
            Arc::new(podman_runner(calls.clone(), 0)),
            fx.installer.clone(),
            IsolationConfig::default(),
        )
        .with_temp_root(&ctx_root);

        for ecosystem in [Ecosystem::Python, Ecosystem::Ruby] {
            env.execute_analysis(ecosystem, &fx.manifest, &AnalysisOptions::default())
                .await
                .unwrap();
        }

        let report = env.cleanup(false).await;

        assert_eq!(report.images_removed, 2);
        assert_eq!(report.directories_removed, 2);
        let rmi_calls = calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args[0] == "rmi")
            .count();
        assert_eq!(rmi_calls, 2);
        assert_eq!(std::fs::read_dir(&ctx_root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cleanup_with_preserve_keeps_images_and_contexts() {
        let fx = fixture();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut env = ContainerEnvironment::new(
            Arc::new(podman_runner(calls.clone(), 0)),
            fx.installer.clone(),
            IsolationConfig::default(),
        )
        .with_temp_root(fx.root.path().join("ctx"));
        env.execute_analysis(Ecosystem::Java, &fx.manifest, &AnalysisOptions::default())
            .await
            .unwrap();

        let report = env.cleanup(true).await;

        assert_eq!(report.images_removed, 0);
        assert_eq!(report.preserved.len(), 2);
        assert!(!calls.lock().unwrap().iter().any(|args| args[0] == "rmi"));
    }
}
