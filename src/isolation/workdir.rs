//! Run-scoped scratch directories

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info};

use crate::isolation::error::IsolationError;

/// A uniquely named directory owned by one analysis run.
///
/// The directory is removed when the guard is dropped, so an environment
/// that is never cleaned up still releases its disk space.
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Creates `<root>/<prefix><random>`; the system temp dir is used when
    /// `root` is `None`.
    pub fn create(root: Option<&Path>, prefix: &str) -> Result<Self, IsolationError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(prefix);
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        debug!("Created work directory {:?}", dir.path());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory, or leaves it on disk and returns its path when
    /// `preserve` is set.
    pub fn release(self, preserve: bool) -> Result<Option<PathBuf>, IsolationError> {
        if preserve {
            let path = self.dir.keep();
            info!("Preserved work directory: {}", path.display());
            return Ok(Some(path));
        }
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed work directory {:?}", path);
        Ok(None)
    }
}
