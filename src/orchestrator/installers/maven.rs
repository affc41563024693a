use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::ecosystem::Ecosystem;
use crate::isolation::process::{CommandSpec, ProcessRunner};
use crate::orchestrator::installer::{
    InstallOutcome, PackageInstaller, installed_versions, run_install,
};
use crate::orchestrator::native_build::{NativeBuild, detect_native_build, inspect_jar};

/// Resolves `groupId:artifactId` at a version through a throwaway pom with
/// `mvn dependency:resolve`, then inspects the resolved JAR in the local
/// repository.
pub struct MavenInstaller {
    runner: Arc<dyn ProcessRunner>,
    work_dir: PathBuf,
    repository_dir: Option<PathBuf>,
}

/// Splits `groupId:artifactId`; a bare name is used for both parts
fn coordinates(package: &str) -> (&str, &str) {
    package.split_once(':').unwrap_or((package, package))
}

fn render_pom(package: &str, version: Option<&str>) -> String {
    let (group_id, artifact_id) = coordinates(package);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<project xmlns="http://maven.apache.org/POM/4.0.0">
    <modelVersion>4.0.0</modelVersion>
    <groupId>graviton.probe</groupId>
    <artifactId>dependency-install-test</artifactId>
    <version>1.0</version>
    <dependencies>
        <dependency>
            <groupId>{group_id}</groupId>
            <artifactId>{artifact_id}</artifactId>
            <version>{version}</version>
        </dependency>
    </dependencies>
</project>
"#,
        version = version.unwrap_or("LATEST")
    )
}

impl MavenInstaller {
    pub fn new(runner: Arc<dyn ProcessRunner>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            work_dir: work_dir.into(),
            repository_dir: dirs::home_dir().map(|home| home.join(".m2").join("repository")),
        }
    }

    /// Local repository the resolved artifacts land in
    pub fn with_repository_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repository_dir = Some(dir.into());
        self
    }

    fn project_dir(&self, package: &str) -> PathBuf {
        let (_, artifact_id) = coordinates(package);
        self.work_dir.join(format!("test-install-{}", artifact_id))
    }

    /// `<repository>/<group path>/<artifactId>`
    fn artifact_dir(&self, package: &str) -> Option<PathBuf> {
        let (group_id, artifact_id) = coordinates(package);
        let mut dir = self.repository_dir.clone()?;
        dir.extend(group_id.split('.'));
        Some(dir.join(artifact_id))
    }

    fn jar_path(&self, package: &str, version: &str) -> Option<PathBuf> {
        let (_, artifact_id) = coordinates(package);
        self.artifact_dir(package)
            .map(|dir| dir.join(version).join(format!("{}-{}.jar", artifact_id, version)))
    }

    /// Newest version in the local repository that has its JAR
    fn newest_resolved(&self, package: &str) -> Option<String> {
        let dir = self.artifact_dir(package)?;
        installed_versions(&dir)
            .into_iter()
            .rev()
            .find(|version| {
                self.jar_path(package, version)
                    .is_some_and(|jar| jar.is_file())
            })
    }
}

#[async_trait::async_trait]
impl PackageInstaller for MavenInstaller {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Java
    }

    async fn attempt_install(&self, package: &str, version: Option<&str>) -> InstallOutcome {
        let project_dir = self.project_dir(package);
        let written = std::fs::create_dir_all(&project_dir)
            .and_then(|_| std::fs::write(project_dir.join("pom.xml"), render_pom(package, version)));
        if let Err(e) = written {
            return InstallOutcome::failed(format!("Installation failed: {}", e));
        }

        let spec = CommandSpec::new("mvn", Ecosystem::Java.install_timeout())
            .args(["dependency:resolve", "-q"])
            .current_dir(&project_dir);
        let mut outcome = run_install(self.runner.as_ref(), &spec).await;

        if outcome.success {
            // mvn -q prints nothing on success; LATEST is read back from the repository
            outcome.resolved_version = match version {
                Some(version) => Some(version.to_string()),
                None => self.newest_resolved(package),
            };
        } else if outcome.error.trim().is_empty() {
            // mvn -q reports resolution problems on stdout
            outcome.error = outcome.output.clone();
        }
        outcome
    }

    async fn detect_native_build(&self, package: &str, outcome: &InstallOutcome) -> NativeBuild {
        let from_output =
            detect_native_build(self.runner.as_ref(), Ecosystem::Java, &outcome.output, None).await;
        if from_output != NativeBuild::No {
            return from_output;
        }

        let Some(jar) = outcome
            .resolved_version
            .as_deref()
            .and_then(|version| self.jar_path(package, version))
            .filter(|jar| jar.is_file())
        else {
            debug!("No resolved JAR to inspect for {}", package);
            return NativeBuild::No;
        };
        inspect_jar(&jar)
            .map(|found| found.verdict())
            .inspect_err(|e| warn!("Failed to inspect {:?}: {}", jar, e))
            .unwrap_or(NativeBuild::No)
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
    use crate::orchestrator::native_build::write_test_jar;
    use rstest::rstest;
    use std::time::Duration;
    use tempfile::TempDir;

    fn succeeding_runner() -> MockProcessRunner {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|_| {
            Ok(CommandOutput {
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            })
        });
        runner
    }

    /// Places `<artifact>-<version>.jar` holding `entries` in a repository layout
    fn publish(repository: &TempDir, package: &str, version: &str, entries: &[&str]) {
        let (group_id, artifact_id) = coordinates(package);
        let mut dir = repository.path().to_path_buf();
        dir.extend(group_id.split('.'));
        let dir = dir.join(artifact_id).join(version);
        std::fs::create_dir_all(&dir).unwrap();
        write_test_jar(&dir.join(format!("{}-{}.jar", artifact_id, version)), entries);
    }

    #[test]
    fn render_pom_uses_coordinates_and_latest_marker() {
        let pom = render_pom("org.xerial:sqlite-jdbc", None);

        assert!(pom.contains("<groupId>org.xerial</groupId>"));
        assert!(pom.contains("<artifactId>sqlite-jdbc</artifactId>"));
        assert!(pom.contains("<version>LATEST</version>"));
    }

    #[tokio::test]
    async fn attempt_install_resolves_in_project_dir_and_uninstall_removes_it() {
        let work = TempDir::new().unwrap();
        let mut runner = MockProcessRunner::new();
        runner.expect_run().times(1).returning(|spec| {
            let cwd = spec.cwd.clone().unwrap();
            let pom = std::fs::read_to_string(cwd.join("pom.xml")).unwrap();
            assert!(pom.contains("<version>3.45.1.0</version>"));
            Ok(CommandOutput {
                exit_code: Some(1),
                stdout: "[ERROR] Failed to execute goal".to_string(),
                stderr: String::new(),
                duration: Duration::from_millis(1),
            })
        });
        let installer = MavenInstaller::new(Arc::new(runner), work.path());

        let outcome = installer
            .attempt_install("org.xerial:sqlite-jdbc", Some("3.45.1.0"))
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.error, "[ERROR] Failed to execute goal");
        let project_dir = work.path().join("test-install-sqlite-jdbc");
        assert!(project_dir.join("pom.xml").exists());

        installer.uninstall("org.xerial:sqlite-jdbc", None).await;
        assert!(!project_dir.exists());
    }

    #[tokio::test]
    async fn latest_install_reports_newest_resolved_jar() {
        let work = TempDir::new().unwrap();
        let repository = TempDir::new().unwrap();
        publish(&repository, "org.xerial:sqlite-jdbc", "3.44.0.0", &[]);
        publish(&repository, "org.xerial:sqlite-jdbc", "3.45.1.0", &[]);
        // A version directory without its JAR was never fully resolved
        std::fs::create_dir_all(
            repository
                .path()
                .join("org/xerial/sqlite-jdbc/3.46.0.0"),
        )
        .unwrap();
        let installer = MavenInstaller::new(Arc::new(succeeding_runner()), work.path())
            .with_repository_dir(repository.path());

        let latest = installer.attempt_install("org.xerial:sqlite-jdbc", None).await;
        let pinned = installer
            .attempt_install("org.xerial:sqlite-jdbc", Some("3.44.0.0"))
            .await;

        assert!(latest.success);
        assert_eq!(latest.resolved_version.as_deref(), Some("3.45.1.0"));
        assert_eq!(pinned.resolved_version.as_deref(), Some("3.44.0.0"));
    }

    #[rstest]
    #[case(&["org/example/Plain.class"], NativeBuild::No)]
    #[case(&["linux-x86_64/libjni.so", "org/example/Jni.class"], NativeBuild::NeedsVerification)]
    #[case(&["linux-x86_64/libjni.so", "linux-aarch64/libjni.so"], NativeBuild::Yes)]
    #[tokio::test]
    async fn detect_native_build_inspects_resolved_jar(
        #[case] entries: &[&str],
        #[case] expected: NativeBuild,
    ) {
        let work = TempDir::new().unwrap();
        let repository = TempDir::new().unwrap();
        publish(&repository, "com.example:jni-lib", "1.2.0", entries);
        let installer = MavenInstaller::new(Arc::new(succeeding_runner()), work.path())
            .with_repository_dir(repository.path());

        let outcome = installer.attempt_install("com.example:jni-lib", None).await;
        let native = installer
            .detect_native_build("com.example:jni-lib", &outcome)
            .await;

        assert_eq!(outcome.resolved_version.as_deref(), Some("1.2.0"));
        assert_eq!(native, expected);
    }

    #[tokio::test]
    async fn detect_native_build_without_jar_is_no() {
        let work = TempDir::new().unwrap();
        let repository = TempDir::new().unwrap();
        let installer = MavenInstaller::new(Arc::new(MockProcessRunner::new()), work.path())
            .with_repository_dir(repository.path());
        let outcome = InstallOutcome {
            success: true,
            resolved_version: Some("9.9".to_string()),
            ..Default::default()
        };

        assert_eq!(
            installer.detect_native_build("com.example:gone", &outcome).await,
            NativeBuild::No
        );
    }
}
