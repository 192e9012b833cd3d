//! Stream stager: materializes byte streams and generated content as staged files
//!
//! Both modes hand back a [`StagedArtifact`] only after the file has been
//! flushed, synced and closed. The file is guarded from the moment it is
//! created, so a stager that is cancelled mid-write removes it. On failure
//! the stager returns [`Error::StageWrite`] carrying the path of the partial
//! file and leaves its removal to the caller.

use super::{StagedArtifact, TempArtifactManager};
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A boxed stream of file bytes
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// UTF-8 byte-order mark written before generated text so viewers pick the right encoding
pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Number of pending appends buffered between a producer and the file writer
const WRITE_QUEUE_DEPTH: usize = 64;

fn stage_error(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::StageWrite {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

async fn finish(mut file: File, path: &Path) -> Result<()> {
    file.flush().await.map_err(|e| stage_error(path, e))?;
    file.sync_all().await.map_err(|e| stage_error(path, e))?;
    Ok(())
}

/// Create the staged file, guarded from the start
///
/// A desired name that is already taken falls back to a generated name with
/// the same extension, so concurrent flows never share a file.
async fn create_artifact<'a>(
    manager: &TempArtifactManager,
    desired_filename: Option<&'a str>,
    mut extension: Option<&'a str>,
) -> Result<(StagedArtifact, File)> {
    let unavailable = |e: std::io::Error| Error::StagingDirUnavailable {
        path: manager.dir().to_path_buf(),
        reason: format!("cannot create staged file: {e}"),
    };

    if let Some(name) = desired_filename {
        let path = manager.allocate_named(name).await?;
        match StagedArtifact::create(&path) {
            Ok(created) => return Ok(created),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(?path, "staged name in use, generating one");
                extension = Path::new(name)
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .or(extension);
            }
            Err(e) => return Err(unavailable(e)),
        }
    }

    let path = manager.allocate(extension).await?;
    StagedArtifact::create(&path).map_err(unavailable)
}

/// Return the finished artifact, or release a failed one to the caller
fn hand_over(artifact: StagedArtifact, written: Result<()>) -> Result<StagedArtifact> {
    match written {
        Ok(()) => Ok(artifact),
        Err(e @ Error::StageWrite { .. }) => {
            // the error carries the path; removal is the caller's
            artifact.into_path();
            Err(e)
        }
        Err(e) => Err(e),
    }
}

/// Copy a byte stream verbatim into a staged file
///
/// With `desired_filename` the artifact gets that name (directory components
/// stripped) unless another artifact already has it; otherwise a random name
/// carrying the extension of `original_filename` is generated.
///
/// # Errors
///
/// - [`Error::StagingDirUnavailable`] if no file could be created
/// - [`Error::StageWrite`] if the source stream fails or a write fails
pub async fn stage_stream<S>(
    manager: &TempArtifactManager,
    source: S,
    original_filename: &str,
    desired_filename: Option<&str>,
) -> Result<StagedArtifact>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    let extension = Path::new(original_filename)
        .extension()
        .and_then(|e| e.to_str());
    let (artifact, file) = create_artifact(manager, desired_filename, extension).await?;

    let written = copy_into(file, artifact.path(), source).await;
    hand_over(artifact, written)
}

async fn copy_into<S>(mut file: File, path: &Path, source: S) -> Result<()>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    let mut source = std::pin::pin!(source);
    let mut written: u64 = 0;
    while let Some(chunk) = source.next().await {
        let chunk = chunk.map_err(|e| stage_error(path, format!("source stream failed: {e}")))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| stage_error(path, e))?;
        written += chunk.len() as u64;
    }

    finish(file, path).await?;
    debug!(?path, bytes = written, "staged stream");
    Ok(())
}

struct AppendRequest {
    data: Bytes,
    written: oneshot::Sender<std::io::Result<()>>,
}

/// Append handle passed to a generated-content producer
///
/// The handle can be cloned into spawned tasks. The staged file is closed
/// only after the producer future has completed and every clone has been
/// dropped.
#[derive(Clone)]
pub struct ArtifactWriter {
    tx: mpsc::Sender<AppendRequest>,
    path: Arc<PathBuf>,
}

impl ArtifactWriter {
    /// Append bytes to the staged file
    ///
    /// Resolves once the bytes have been written to the file, so appends from
    /// one caller land in the order they were awaited.
    pub async fn append(&self, data: impl Into<Bytes>) -> Result<()> {
        let (written, done) = oneshot::channel();
        self.tx
            .send(AppendRequest {
                data: data.into(),
                written,
            })
            .await
            .map_err(|_| stage_error(&self.path, "artifact writer closed"))?;

        done.await
            .map_err(|_| stage_error(&self.path, "artifact writer closed"))?
            .map_err(|e| stage_error(&self.path, e))
    }
}

/// Write generated content into a staged file
///
/// Writes [`UTF8_BOM`] and `prefix`, then runs `producer` with an
/// [`ArtifactWriter`]. A random `.csv` name is used unless
/// `desired_filename` is given and still free.
///
/// # Errors
///
/// - [`Error::StagingDirUnavailable`] if no file could be created
/// - [`Error::StageWrite`] if a write fails or the producer returns an error
pub async fn stage_generated<F, Fut>(
    manager: &TempArtifactManager,
    prefix: &str,
    producer: F,
    desired_filename: Option<&str>,
) -> Result<StagedArtifact>
where
    F: FnOnce(ArtifactWriter) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let (artifact, file) = create_artifact(manager, desired_filename, Some("csv")).await?;

    let written = generate_into(file, artifact.path(), prefix, producer).await;
    hand_over(artifact, written)
}

async fn generate_into<F, Fut>(mut file: File, path: &Path, prefix: &str, producer: F) -> Result<()>
where
    F: FnOnce(ArtifactWriter) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    file.write_all(UTF8_BOM)
        .await
        .map_err(|e| stage_error(path, e))?;
    file.write_all(prefix.as_bytes())
        .await
        .map_err(|e| stage_error(path, e))?;

    let (tx, mut rx) = mpsc::channel::<AppendRequest>(WRITE_QUEUE_DEPTH);
    let writer = ArtifactWriter {
        tx,
        path: Arc::new(path.to_path_buf()),
    };

    // Drains until every ArtifactWriter clone is gone, which is the producer's
    // real completion signal even when it hands the writer to other tasks.
    let drain = async move {
        let mut appends: u64 = 0;
        while let Some(request) = rx.recv().await {
            let result = file.write_all(&request.data).await;
            let failure = result.as_ref().err().map(|e| e.to_string());
            request.written.send(result).ok();
            if let Some(reason) = failure {
                return Err(reason);
            }
            appends += 1;
        }
        Ok((file, appends))
    };

    let (produced, drained) = tokio::join!(producer(writer), drain);

    let (file, appends) = drained.map_err(|reason| stage_error(path, reason))?;
    if let Err(e) = produced {
        return Err(stage_error(path, format!("producer failed: {e}")));
    }

    finish(file, path).await?;
    debug!(?path, appends, "staged generated content");
    Ok(())
}
