use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::ecosystem::Ecosystem;
use crate::isolation::process::{CommandSpec, ProcessRunner};
use crate::orchestrator::installer::{
    InstallOutcome, PackageInstaller, installed_versions, run_install,
};
use crate::orchestrator::native_build::{NativeBuild, detect_native_build};

const TARGET_FRAMEWORK: &str = "net8.0";
const RUNTIME_IDENTIFIER: &str = "linux-arm64";

/// Restores a single package reference for `linux-arm64` through a
/// throwaway project.
pub struct NugetInstaller {
    runner: Arc<dyn ProcessRunner>,
    work_dir: PathBuf,
    packages_dir: Option<PathBuf>,
}

fn render_project(package: &str, version: Option<&str>) -> String {
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <TargetFramework>{TARGET_FRAMEWORK}</TargetFramework>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="{package}" Version="{version}" />
  </ItemGroup>
</Project>
"#,
        version = version.unwrap_or("*")
    )
}

/// Version NuGet restored for `package`, from the `libraries` section of
/// `obj/project.assets.json` (keys are `Id/Version`)
fn restored_version(project_dir: &Path, package: &str) -> Option<String> {
    let content =
        std::fs::read_to_string(project_dir.join("obj").join("project.assets.json")).ok()?;
    let assets: serde_json::Value = serde_json::from_str(&content).ok()?;
    assets
        .get("libraries")?
        .as_object()?
        .keys()
        .find_map(|key| {
            let (id, version) = key.split_once('/')?;
            id.eq_ignore_ascii_case(package).then(|| version.to_string())
        })
}

impl NugetInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            work_dir: work_dir.into(),
            packages_dir: dirs::home_dir().map(|home| home.join(".nuget").join("packages")),
        }
    }

    /// Global packages folder used to inspect restored files
    pub fn with_packages_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.packages_dir = Some(dir.into());
        self
    }

    fn project_dir(&self, package: &str) -> PathBuf {
        self.work_dir.join(format!("nuget_{}", package.to_lowercase()))
    }
}

#[async_trait::async_trait]
impl PackageInstaller for NugetInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::DotNet
    }

    async fn attempt_install(&self, package: &str, version: Option<&str>) -> InstallOutcome {
        let project_dir = self.project_dir(package);
        let written = std::fs::create_dir_all(&project_dir).and_then(|_| {
            std::fs::write(
                project_dir.join("test.csproj"),
                render_project(package, version),
            )
        });
        if let Err(e) = written {
            return InstallOutcome::failed(format!("Installation failed: {}", e));
        }

        let spec = CommandSpec::new("dotnet", Ecosystem::DotNet.install_timeout())
            .args(["restore", "test.csproj", "--runtime", RUNTIME_IDENTIFIER])
            .current_dir(&project_dir);
        let mut outcome = run_install(self.runner.as_ref(), &spec).await;

        if outcome.success {
            let package_dir = self
                .packages_dir
                .as_ref()
                .map(|dir| dir.join(package.to_lowercase()));
            let resolved = restored_version(&project_dir, package)
                .or_else(|| version.map(str::to_string))
                .or_else(|| package_dir.as_deref().and_then(|dir| installed_versions(dir).pop()));
            debug!("Restored {} {:?}", package, resolved);

            // NuGet stores ids and versions lowercased under the global packages folder
            outcome.artifact_dir = match (&package_dir, &resolved) {
                (Some(dir), Some(resolved)) => {
                    Some(dir.join(resolved.to_lowercase())).filter(|path| path.is_dir())
                }
                _ => None,
            };
            outcome.resolved_version = resolved;
        } else if outcome.error.trim().is_empty() {
            outcome.error = outcome.output.clone();
        }
        outcome
    }

    async fn detect_native_build(&self, _package: &str, outcome: &InstallOutcome) -> NativeBuild {
        detect_native_build(
            self.runner.as_ref(),
            Ecosystem::DotNet,
            &outcome.output,
            outcome.artifact_dir.as_deref(),
        )
        .await
    }

    async fn uninstall(&self, package: &str, _version: Option<&str>) {
        let project_dir = self.project_dir(package);
        if let Err(e) = std::fs::remove_dir_all(&project_dir) {
            debug!("Failed to remove {:?} (ignoring): {}", project_dir, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isolation::process::{CommandOutput, MockProcessRunner};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn render_project_pins_reference() {
        let project = render_project("Newtonsoft.Json", Some("13.0.3"));

        assert!(project.contains("<TargetFramework>net8.0</TargetFramework>"));
        assert!(project.contains(r#"<PackageReference Include="Newtonsoft.Json" Version="13.0.3" />"#));
        assert!(render_project("Serilog", None).contains(r#"Version="*""#));
    }

    #[tokio::test]
    async fn attempt_install_restores_for_arm64_runtime() {
        let work = TempDir::new().unwrap();
        let packages = TempDir::new().unwrap();
        let restored = packages.path().join("skiasharp").join("2.88.7");
        std::fs::create_dir_all(&restored).unwrap();

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|spec| {
            assert_eq!(spec.program, "dotnet");
            assert_eq!(
                spec.args,
                vec!["restore", "test.csproj", "--runtime", "linux-arm64"]
            );
            assert!(spec.cwd.as_ref().unwrap().join("test.csproj").exists());
            Ok(CommandOutput {
                exit_code: Some(0),
                stdout: "Restored test.csproj".to_string(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            })
        });
        let installer = NugetInstaller::new(Arc::new(runner), work.path())
            .with_packages_dir(packages.path());

        let outcome = installer
            .attempt_install("SkiaSharp", Some("2.88.7"))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.artifact_dir, Some(restored));
    }

    fn restore_output() -> CommandOutput {
        CommandOutput {
            exit_code: Some(0),
            stdout: "Restored test.csproj".to_string(),
            stderr: String::new(),
            duration: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn floating_restore_reads_version_from_assets_file() {
        let work = TempDir::new().unwrap();
        let packages = TempDir::new().unwrap();
        let restored = packages.path().join("newtonsoft.json").join("13.0.3");
        std::fs::create_dir_all(&restored).unwrap();

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|spec| {
            let obj = spec.cwd.as_ref().unwrap().join("obj");
            std::fs::create_dir_all(&obj).unwrap();
            std::fs::write(
                obj.join("project.assets.json"),
                r#"{"version": 3, "libraries": {"Newtonsoft.Json/13.0.3": {"type": "package"}}}"#,
            )
            .unwrap();
            Ok(restore_output())
        });
        let installer = NugetInstaller::new(Arc::new(runner), work.path())
            .with_packages_dir(packages.path());

        let outcome = installer.attempt_install("Newtonsoft.Json", None).await;

        assert!(outcome.success);
        assert_eq!(outcome.resolved_version.as_deref(), Some("13.0.3"));
        assert_eq!(outcome.artifact_dir, Some(restored));
    }

    #[tokio::test]
    async fn floating_restore_without_assets_uses_newest_cached_version() {
        let work = TempDir::new().unwrap();
        let packages = TempDir::new().unwrap();
        for version in ["2.88.6", "2.88.10", "2.88.7"] {
            std::fs::create_dir_all(packages.path().join("skiasharp").join(version)).unwrap();
        }

        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|_| Ok(restore_output()));
        let installer = NugetInstaller::new(Arc::new(runner), work.path())
            .with_packages_dir(packages.path());

        let outcome = installer.attempt_install("SkiaSharp", None).await;

        assert_eq!(outcome.resolved_version.as_deref(), Some("2.88.10"));
        assert_eq!(
            outcome.artifact_dir,
            Some(packages.path().join("skiasharp").join("2.88.10"))
        );
    }
}
