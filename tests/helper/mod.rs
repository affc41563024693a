//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use graviton_probe::ecosystem::Ecosystem;
use graviton_probe::isolation::error::IsolationError;
use graviton_probe::isolation::process::{CommandOutput, CommandSpec, ProcessRunner};
use graviton_probe::orchestrator::installer::{InstallOutcome, PackageInstaller};
use graviton_probe::orchestrator::native_build::NativeBuild;
use graviton_probe::registry::error::RegistryError;
use graviton_probe::registry::{MetadataClient, PackageMetadata};

pub fn output(exit_code: i32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_code: Some(exit_code),
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        duration: Duration::from_millis(1),
    }
}

type Handler = dyn Fn(&CommandSpec) -> Result<CommandOutput, IsolationError> + Send + Sync;

/// Process runner that answers through a closure and records every command
#[derive(Clone)]
pub struct RecordingRunner {
    handler: Arc<Handler>,
    missing_tools: Vec<String>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl RecordingRunner {
    pub fn new(
        handler: impl Fn(&CommandSpec) -> Result<CommandOutput, IsolationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Arc::new(handler),
            missing_tools: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Tools that do not resolve on PATH
    pub fn without_tools(mut self, tools: &[&str]) -> Self {
        self.missing_tools = tools.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// `program arg...` for every recorded command
    pub fn command_lines(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|spec| {
                std::iter::once(spec.program.as_str())
                    .chain(spec.args.iter().map(String::as_str))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect()
    }
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, IsolationError> {
        self.calls.lock().unwrap().push(spec.clone());
        (self.handler)(spec)
    }

    fn resolve(&self, program: &str) -> Option<PathBuf> {
        (!self.missing_tools.iter().any(|t| t == program))
            .then(|| PathBuf::from("/usr/bin").join(program))
    }
}

/// Installer whose outcomes are scripted per version; `None` is the
/// unpinned latest install.
#[derive(Clone)]
pub struct ScriptedInstaller {
    ecosystem: Ecosystem,
    working: HashMap<Option<String>, Option<String>>,
    native: NativeBuild,
    installs: Arc<Mutex<Vec<Option<String>>>>,
    uninstalls: Arc<Mutex<Vec<Option<String>>>>,
}

impl ScriptedInstaller {
    pub fn new(ecosystem: Ecosystem) -> Self {
        Self {
            ecosystem,
            working: HashMap::new(),
            native: NativeBuild::No,
            installs: Arc::new(Mutex::new(Vec::new())),
            uninstalls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `version` installs successfully, reporting `resolved` as the installed version
    pub fn works(mut self, version: Option<&str>, resolved: Option<&str>) -> Self {
        self.working
            .insert(version.map(str::to_string), resolved.map(str::to_string));
        self
    }

    pub fn with_native(mut self, native: NativeBuild) -> Self {
        self.native = native;
        self
    }

    pub fn installs(&self) -> Vec<Option<String>> {
        self.installs.lock().unwrap().clone()
    }

    pub fn uninstalls(&self) -> Vec<Option<String>> {
        self.uninstalls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageInstaller for ScriptedInstaller {
    fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    async fn attempt_install(&self, package: &str, version: Option<&str>) -> InstallOutcome {
        let key = version.map(str::to_string);
        self.installs.lock().unwrap().push(key.clone());
        match self.working.get(&key) {
            Some(resolved) => InstallOutcome {
                success: true,
                output: format!("installed {}", package),
                resolved_version: resolved.clone(),
                ..Default::default()
            },
            None => InstallOutcome::failed(format!(
                "ERROR: Could not find a version that satisfies the requirement {}",
                package
            )),
        }
    }

    async fn detect_native_build(&self, _package: &str, _outcome: &InstallOutcome) -> NativeBuild {
        self.native
    }

    async fn uninstall(&self, _package: &str, version: Option<&str>) {
        self.uninstalls
            .lock()
            .unwrap()
            .push(version.map(str::to_string));
    }
}

/// Registry client that always names the same latest version and counts lookups
#[derive(Clone)]
pub struct FixedRegistry {
    ecosystem: Ecosystem,
    latest: Option<String>,
    lookups: Arc<Mutex<usize>>,
}

impl FixedRegistry {
    pub fn new(ecosystem: Ecosystem, latest: Option<&str>) -> Self {
        Self {
            ecosystem,
            latest: latest.map(str::to_string),
            lookups: Arc::new(Mutex::new(0)),
        }
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl MetadataClient for FixedRegistry {
    fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    async fn fetch_metadata(&self, package_name: &str) -> Result<PackageMetadata, RegistryError> {
        *self.lookups.lock().unwrap() += 1;
        Ok(PackageMetadata {
            name: package_name.to_string(),
            latest_version: self.latest.clone(),
            arm64_artifacts: true,
            platform_specific: false,
        })
    }
}
