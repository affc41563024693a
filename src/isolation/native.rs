//! Native-subprocess isolation: the installer runs directly on the host in a
//! scratch directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::ecosystem::Ecosystem;
use crate::isolation::error::IsolationError;
use crate::isolation::output::{output_file_name, output_file_path};
use crate::isolation::process::{CommandSpec, ProcessRunner};
use crate::isolation::workdir::WorkDir;
use crate::isolation::{
    AnalysisOptions, CleanupReport, ExecutionResult, IsolationEnvironment, PrerequisiteStatus,
    RunContext, extract_tool_version, finish_execution, probe_tool, stage_installer,
    stage_manifest,
};

pub struct NativeEnvironment {
    runner: Arc<dyn ProcessRunner>,
    installer: PathBuf,
    temp_root: Option<PathBuf>,
    runtime_versions: HashMap<Ecosystem, String>,
    work_dirs: Vec<WorkDir>,
}

impl NativeEnvironment {
    /// `installer` is the probe executable copied into each work directory
    pub fn new(runner: Arc<dyn ProcessRunner>, installer: PathBuf) -> Self {
        Self {
            runner,
            installer,
            temp_root: None,
            runtime_versions: HashMap::new(),
            work_dirs: Vec::new(),
        }
    }

    /// Creates work directories under `root` instead of the system temp dir
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Number of work directories awaiting cleanup
    pub fn pending_directories(&self) -> usize {
        self.work_dirs.len()
    }

    fn environment_descriptor(&self, ecosystem: Ecosystem) -> String {
        let version = self
            .runtime_versions
            .get(&ecosystem)
            .map(String::as_str)
            .unwrap_or("unknown");
        match ecosystem {
            Ecosystem::DotNet => format!("native_dotnet_{}", version),
            _ => format!("{}_{}", ecosystem, version),
        }
    }
}

#[async_trait]
impl IsolationEnvironment for NativeEnvironment {
    fn kind(&self) -> &'static str {
        "native"
    }

    async fn check_prerequisites(&mut self, ecosystem: Ecosystem) -> PrerequisiteStatus {
        let mut missing = Vec::new();
        let mut runtime_version = None;

        for (i, tool) in ecosystem.prerequisites().iter().enumerate() {
            match probe_tool(self.runner.as_ref(), tool).await {
                Some(output) if i == 0 => runtime_version = extract_tool_version(&output),
                Some(_) => {}
                None => missing.push(tool.to_string()),
            }
        }

        if let Some(version) = &runtime_version {
            self.runtime_versions.insert(ecosystem, version.clone());
        }
        if !missing.is_empty() {
            warn!("Missing {} prerequisites: {}", ecosystem, missing.join(", "));
        }

        PrerequisiteStatus {
            satisfied: missing.is_empty(),
            missing,
            runtime_version,
        }
    }

    async fn execute_analysis(
        &mut self,
        ecosystem: Ecosystem,
        manifest_path: &Path,
        options: &AnalysisOptions,
    ) -> Result<ExecutionResult, IsolationError> {
        let work_dir = WorkDir::create(
            self.temp_root.as_deref(),
            &format!("graviton_{}_", ecosystem),
        )?;
        let manifest_name = stage_manifest(manifest_path, work_dir.path())?;
        let installer = stage_installer(&self.installer, work_dir.path())?;

        let file_name = output_file_name(options.sbom_name.as_deref(), manifest_path, ecosystem);
        std::fs::create_dir_all(work_dir.path().join(ecosystem.as_str()))?;
        let expected_output = output_file_path(work_dir.path(), ecosystem, &file_name);

        let timeout = ecosystem.analysis_timeout();
        let spec = CommandSpec::new(installer.to_string_lossy(), timeout)
            .args([
                "run-installer".to_string(),
                manifest_name,
                "-o".to_string(),
                format!("{}/{}", ecosystem, file_name),
            ])
            .current_dir(work_dir.path());

        info!("Running native {} analysis in {:?}", ecosystem, work_dir.path());
        let start = Instant::now();
        let run = self.runner.run(&spec).await;

        let result = finish_execution(
            RunContext {
                ecosystem,
                work_dir: work_dir.path(),
                expected_output: &expected_output,
                environment: self.environment_descriptor(ecosystem),
                timeout,
                options,
                search_alternatives: false,
            },
            run,
            start.elapsed(),
        );

        self.work_dirs.push(work_dir);
        Ok(result)
    }

    async fn cleanup(&mut self, preserve_for_debug: bool) -> CleanupReport {
        let mut report = CleanupReport::default();
        if preserve_for_debug {
            info!(
                "Cleanup disabled: preserving {} work directories",
                self.work_dirs.len()
            );
        }

        for work_dir in self.work_dirs.drain(..) {
            match work_dir.release(preserve_for_debug) {
                Ok(Some(path)) => report.preserved.push(path.display().to_string()),
                Ok(None) => report.directories_removed += 1,
                Err(e) => warn!("Failed to remove work directory: {}", e),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::process::{CommandOutput, MockProcessRunner};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        manifest: PathBuf,
        installer: PathBuf,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let manifest = root.path().join("groups.json");
        std::fs::write(&manifest, r#"{"ecosystem":"python","packages":[]}"#).unwrap();
        let installer = root.path().join("probe-bin");
        std::fs::write(&installer, "#!/bin/sh\n").unwrap();
        Fixture {
            root,
            manifest,
            installer,
        }
    }

    fn ok_output(stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn check_prerequisites_reports_missing_tools() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_resolve()
            .returning(|tool| (tool == "node").then(|| PathBuf::from("/usr/bin/node")));
        runner
            .expect_run()
            .returning(|_| Ok(ok_output("v20.11.1")));
        let mut env = NativeEnvironment::new(Arc::new(runner), PathBuf::from("probe"));

        let status = env.check_prerequisites(Ecosystem::NodeJs).await;

        assert!(!status.satisfied);
        assert_eq!(status.missing, vec!["npm".to_string()]);
        assert_eq!(status.runtime_version.as_deref(), Some("20.11.1"));
        assert_eq!(env.environment_descriptor(Ecosystem::NodeJs), "nodejs_20.11.1");
    }

    #[tokio::test]
    async fn execute_analysis_reads_result_file_written_by_installer() {
        let fx = fixture();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|spec| {
            assert_eq!(spec.args[0], "run-installer");
            assert_eq!(spec.args[1], "groups.json");
            assert_eq!(spec.args[3], "python/groups_python_analysis.json");
            let cwd = spec.cwd.clone().unwrap();
            assert!(cwd.join("groups.json").exists());
            assert!(cwd.join("graviton-probe").exists());
            std::fs::write(cwd.join(&spec.args[3]), r#"[{"from":"file"}]"#).unwrap();
            Ok(ok_output("ignored"))
        });
        let mut env = NativeEnvironment::new(Arc::new(runner), fx.installer.clone())
            .with_temp_root(fx.root.path().join("work"));

        let result = env
            .execute_analysis(Ecosystem::Python, &fx.manifest, &AnalysisOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, r#"[{"from":"file"}]"#);
        assert_eq!(result.environment, "python_unknown");
        assert_eq!(env.pending_directories(), 1);
    }

    #[tokio::test]
    async fn execute_analysis_falls_back_to_stdout() {
        let fx = fixture();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|_| Ok(ok_output("[]")));
        let mut env = NativeEnvironment::new(Arc::new(runner), fx.installer.clone())
            .with_temp_root(fx.root.path().join("work"));

        let result = env
            .execute_analysis(Ecosystem::Ruby, &fx.manifest, &AnalysisOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "[]");
    }

    #[tokio::test]
    async fn execute_analysis_contains_timeouts() {
        let fx = fixture();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|spec| {
            Err(IsolationError::Timeout {
                command: spec.program.clone(),
                timeout_secs: spec.timeout.as_secs(),
            })
        });
        let mut env = NativeEnvironment::new(Arc::new(runner), fx.installer.clone())
            .with_temp_root(fx.root.path().join("work"));

        let result = env
            .execute_analysis(Ecosystem::DotNet, &fx.manifest, &AnalysisOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(
            result.error.as_deref(),
            Some("dotnet analysis timed out after 120 seconds")
        );
        assert_eq!(result.environment, "native_dotnet_unknown");
    }

    #[tokio::test]
    async fn execute_analysis_fails_for_missing_manifest() {
        let fx = fixture();
        let runner = MockProcessRunner::new();
        let mut env = NativeEnvironment::new(Arc::new(runner), fx.installer.clone())
            .with_temp_root(fx.root.path().join("work"));

        let result = env
            .execute_analysis(
                Ecosystem::Python,
                &fx.root.path().join("missing.json"),
                &AnalysisOptions::default(),
            )
            .await;

        assert!(matches!(result, Err(IsolationError::Io(_))));
        assert_eq!(env.pending_directories(), 0);
    }

    #[tokio::test]
    async fn cleanup_removes_every_work_directory_once() {
        let fx = fixture();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|_| Ok(ok_output("[]")));
        let work_root = fx.root.path().join("work");
        let mut env =
            NativeEnvironment::new(Arc::new(runner), fx.installer.clone()).with_temp_root(&work_root);

        for ecosystem in [Ecosystem::Python, Ecosystem::NodeJs, Ecosystem::Ruby] {
            env.execute_analysis(ecosystem, &fx.manifest, &AnalysisOptions::default())
                .await
                .unwrap();
        }

        let report = env.cleanup(false).await;
        assert_eq!(report.directories_removed, 3);
        assert_eq!(std::fs::read_dir(&work_root).unwrap().count(), 0);

        let second = env.cleanup(false).await;
        assert_eq!(second, CleanupReport::default());
    }

    #[tokio::test]
    async fn cleanup_with_preserve_keeps_directories() {
        let fx = fixture();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|_| Ok(ok_output("[]")));
        let work_root = fx.root.path().join("work");
        let mut env =
            NativeEnvironment::new(Arc::new(runner), fx.installer.clone()).with_temp_root(&work_root);
        env.execute_analysis(Ecosystem::Java, &fx.manifest, &AnalysisOptions::default())
            .await
            .unwrap();

        let report = env.cleanup(true).await;

        assert_eq!(report.directories_removed, 0);
        assert_eq!(report.preserved.len(), 1);
        assert!(Path::new(&report.preserved[0]).exists());
    }
}
