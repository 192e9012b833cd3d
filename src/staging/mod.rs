//! Temporary artifact staging
//!
//! Every file that passes through the delivery pipeline is first written to
//! one of two staging directories:
//! - **uploads**: inbound bytes received from clients
//! - **downloads**: outbound artifacts fetched from the content store or generated
//!
//! - [`TempArtifactManager`] - unique path allocation and best-effort removal
//! - [`StagedArtifact`] - scoped ownership of one staged file
//! - [`stager`] - draining byte streams and generated content into staged files

use crate::config::StagingConfig;
use crate::error::{Error, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

mod artifact;
pub mod stager;

pub use artifact::StagedArtifact;
pub use stager::{ArtifactWriter, ByteStream, UTF8_BOM, stage_generated, stage_stream};

/// Length of generated artifact names
const GENERATED_NAME_LEN: usize = 21;

/// Allocates and removes staged artifacts inside one directory
#[derive(Clone, Debug)]
pub struct TempArtifactManager {
    dir: PathBuf,
}

impl TempArtifactManager {
    /// Create a manager for the given staging directory
    ///
    /// The directory is not touched until the first allocation.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The staging directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a unique path with a random name and optional extension
    ///
    /// The staging directory (and its parents) is created first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StagingDirUnavailable`] if the directory cannot be
    /// created or is not a writable directory.
    pub async fn allocate(&self, suggested_extension: Option<&str>) -> Result<PathBuf> {
        self.ensure_dir().await?;

        let name = match suggested_extension
            .map(|ext| ext.trim_start_matches('.'))
            .filter(|ext| !ext.is_empty())
        {
            Some(ext) => format!("{}.{}", random_name(), ext),
            None => random_name(),
        };

        Ok(self.dir.join(name))
    }

    /// Allocate a path with a caller-chosen file name
    ///
    /// Only the final component of `filename` is used, so the result always
    /// lies directly inside the staging directory. The name is not reserved:
    /// whoever creates the file first owns it.
    pub async fn allocate_named(&self, filename: &str) -> Result<PathBuf> {
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| Error::Validation(format!("invalid file name: {filename:?}")))?;

        self.ensure_dir().await?;
        Ok(self.dir.join(name))
    }

    /// Remove staged files, best effort
    ///
    /// Every path is attempted even if earlier ones fail. Failures are logged
    /// and never returned; a file that is already gone is not an error.
    pub async fn remove(&self, paths: &[PathBuf]) {
        for path in paths {
            report_removal(path, fs::remove_file(path).await);
        }
    }

    async fn ensure_dir(&self) -> Result<()> {
        let unavailable = |reason: String| Error::StagingDirUnavailable {
            path: self.dir.clone(),
            reason,
        };

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let metadata = fs::metadata(&self.dir)
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        if !metadata.is_dir() {
            return Err(unavailable("not a directory".to_string()));
        }
        if metadata.permissions().readonly() {
            return Err(unavailable("directory is read-only".to_string()));
        }

        Ok(())
    }
}

/// Synchronous counterpart of [`TempArtifactManager::remove`] for drop paths
pub(crate) fn remove_now(path: &Path) {
    report_removal(path, std::fs::remove_file(path));
}

fn report_removal(path: &Path, result: std::io::Result<()>) {
    match result {
        Ok(()) => debug!(?path, "removed staged artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "staged artifact already removed");
        }
        Err(e) => warn!(?path, error = %e, "failed to remove staged artifact"),
    }
}

fn random_name() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_NAME_LEN)
        .map(char::from)
        .collect()
}

/// The inbound and outbound staging directories
#[derive(Clone, Debug)]
pub struct StagingArea {
    /// Inbound uploads
    pub uploads: TempArtifactManager,
    /// Outbound downloads and generated exports
    pub downloads: TempArtifactManager,
}

impl StagingArea {
    /// Build both managers from configuration
    pub fn from_config(config: &StagingConfig) -> Self {
        Self {
            uploads: TempArtifactManager::new(&config.upload_dir),
            downloads: TempArtifactManager::new(&config.download_dir),
        }
    }
}
