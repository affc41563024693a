//! Bounded child-process execution

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

use crate::isolation::error::IsolationError;

/// A command to run with a hard timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    /// Rendering used in logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Seam between the environments and the operating system
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the command to completion or kills it at the timeout
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, IsolationError>;

    /// Resolves a program on PATH
    fn resolve(&self, program: &str) -> Option<PathBuf>;
}

/// [`ProcessRunner`] backed by `tokio::process`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

#[async_trait::async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, IsolationError> {
        debug!("Running: {}", spec.display());

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let start = Instant::now();
        let output = match tokio::time::timeout(spec.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(IsolationError::Spawn {
                    command: spec.program.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(IsolationError::Timeout {
                    command: spec.program.clone(),
                    timeout_secs: spec.timeout.as_secs(),
                });
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        })
    }

    fn resolve(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }
}
