use thiserror::Error;

#[derive(Debug, Error)]
pub enum IsolationError {
    #[error("Failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} timed out after {timeout_secs} seconds")]
    Timeout { command: String, timeout_secs: u64 },

    #[error("Workspace I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No container runtime found (tried docker, podman)")]
    NoContainerRuntime,

    #[error("Invalid manifest path: {0}")]
    InvalidManifest(String),
}

impl IsolationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, IsolationError::Timeout { .. })
    }
}
