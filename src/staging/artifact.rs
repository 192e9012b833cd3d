//! Scoped ownership of a staged file

use super::remove_now;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs::File;

/// A staged file that is removed exactly once when its owner is done with it
///
/// The guard exists from the moment the file is created, so a dropped
/// owner (early return, cancelled request, client disconnect) removes the
/// file whether or not it was fully written.
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
    armed: bool,
}

impl StagedArtifact {
    /// Take ownership of a file that has been fully written
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    /// Create a new file at `path` and guard it
    ///
    /// Fails with [`std::io::ErrorKind::AlreadyExists`] if anything is at
    /// `path` already; an existing file is never truncated or adopted.
    pub(crate) fn create(path: impl Into<PathBuf>) -> std::io::Result<(Self, File)> {
        let path = path.into();
        // Opened synchronously: no await point between creating the file and owning it
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok((Self::new(path), File::from_std(file)))
    }

    /// Location of the staged file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size on disk
    ///
    /// Re-read after a transform, since encryption may change the size.
    pub async fn size(&self) -> Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Give up ownership without removing the file
    pub fn into_path(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        if self.armed {
            self.armed = false;
            remove_now(&self.path);
        }
    }
}
