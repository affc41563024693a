use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid manifest JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown ecosystem in manifest: {0}")]
    UnknownEcosystem(String),
}
