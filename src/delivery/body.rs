//! Response body that owns its staged artifact

use crate::staging::StagedArtifact;
use bytes::Bytes;
use futures::{Stream, ready};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Byte stream over a staged artifact
///
/// The artifact is removed, and its staging slot released, as soon as the
/// stream ends, fails, or is dropped before completion (client disconnect).
pub struct ArtifactBody {
    // field order matters: the file handle is closed before the artifact is removed
    reader: Option<ReaderStream<File>>,
    artifact: Option<StagedArtifact>,
    slot: Option<OwnedSemaphorePermit>,
}

impl ArtifactBody {
    pub(crate) fn new(file: File, artifact: StagedArtifact, slot: OwnedSemaphorePermit) -> Self {
        Self {
            reader: Some(ReaderStream::new(file)),
            artifact: Some(artifact),
            slot: Some(slot),
        }
    }

    /// Path of the artifact being served, until it is removed
    pub fn path(&self) -> Option<&Path> {
        self.artifact.as_ref().map(StagedArtifact::path)
    }

    fn release(&mut self) {
        self.reader = None;
        self.artifact = None;
        self.slot = None;
    }
}

impl Stream for ArtifactBody {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(None);
        };

        match ready!(Pin::new(reader).poll_next(cx)) {
            Some(Ok(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Some(Err(e)) => {
                warn!(path = ?this.path(), error = %e, "failed to read staged artifact");
                this.release();
                Poll::Ready(Some(Err(e)))
            }
            None => {
                debug!(path = ?this.path(), "artifact fully served");
                this.release();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for ArtifactBody {
    fn drop(&mut self) {
        if self.artifact.is_some() {
            debug!(path = ?self.path(), "response dropped before completion");
            self.release();
        }
    }
}

impl std::fmt::Debug for ArtifactBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactBody")
            .field("path", &self.path())
            .finish()
    }
}
