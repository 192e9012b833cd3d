//! Staged delivery pipeline
//!
//! Every delivery follows the same sequence: stage the bytes to a temp file,
//! run the gateway transform the content requires, re-read the final size,
//! then hand out headers plus an [`ArtifactBody`] that removes the file when
//! the response is over.
//!
//! The artifact is guarded by [`StagedArtifact`] from the moment it is
//! created, so a failure or a dropped request before the body exists removes
//! it before control returns to the caller. A concurrency bound limits how many artifacts are on
//! disk at once; the slot travels with the body.

mod body;

pub use body::ArtifactBody;

use crate::config::{Config, DeliveryConfig};
use crate::content::{self, Bucket, ContentStore, DEFAULT_CONTENT_TYPE};
use crate::error::{Error, Result};
use crate::gateway::{GatewayClient, TransformKind};
use crate::staging::{
    ArtifactWriter, StagedArtifact, StagingArea, TempArtifactManager, stage_generated,
    stage_stream,
};
use bytes::Bytes;
use futures::Stream;
use std::future::Future;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

/// Encoding announced for generated text
const GENERATED_ENCODING: &str = "utf-8";

/// Bytes read from a transformed upload to guess its encoding
const ENCODING_PROBE_LEN: usize = 200;

/// A stored file to deliver
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFileRequest {
    /// Bucket holding the file
    pub bucket: Bucket,
    /// File id inside the bucket
    pub file_id: String,
    /// Name the client downloads the file as
    pub filename: String,
}

/// Response headers of a delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryHeaders {
    /// `Content-Type`, including the charset parameter
    pub content_type: String,
    /// `Cache-Control`
    pub cache_control: String,
    /// `Content-Disposition`, always an attachment with a URL-escaped filename
    pub content_disposition: String,
    /// `Content-Length`: the size of the staged file after any transform
    pub content_length: u64,
}

/// A prepared delivery: headers plus the self-cleaning body
#[derive(Debug)]
pub struct Delivery {
    /// Headers to send before the body
    pub headers: DeliveryHeaders,
    /// Bytes of the staged artifact
    pub body: ArtifactBody,
}

/// Stages, transforms and serves files
pub struct DeliveryPipeline {
    staging: StagingArea,
    gateway: Arc<GatewayClient>,
    store: Arc<dyn ContentStore>,
    config: DeliveryConfig,
    slots: Arc<Semaphore>,
}

impl DeliveryPipeline {
    /// Create a pipeline over the given gateway and content store
    pub fn new(config: &Config, gateway: Arc<GatewayClient>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            staging: StagingArea::from_config(&config.staging),
            gateway,
            store,
            config: config.delivery.clone(),
            slots: Arc::new(Semaphore::new(config.staging.max_staged_artifacts.max(1))),
        }
    }

    /// The staging directories
    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// The gateway client used for transforms
    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// Number of artifacts that can still be staged without waiting
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Deliver a file from the content store
    ///
    /// The file is always staged; files whose bucket requires it are
    /// encrypted and announced with the configured encrypted content type.
    /// The charset is the stored encoding, or detected from the first bytes.
    ///
    /// # Errors
    ///
    /// Store errors ([`Error::NotFound`], [`Error::ContentStore`]), staging
    /// errors and gateway errors. The staged file is gone by the time any of
    /// them is returned.
    pub async fn deliver_stored(&self, request: &StoredFileRequest) -> Result<Delivery> {
        self.deliver_stored_inner(request).await.inspect_err(|e| {
            error!(
                bucket = %request.bucket,
                file_id = %request.file_id,
                error = %e,
                "stored file delivery failed"
            );
        })
    }

    async fn deliver_stored_inner(&self, request: &StoredFileRequest) -> Result<Delivery> {
        let slot = self.acquire_slot().await?;

        let (metadata, source) = tokio::try_join!(
            self.store.fetch_metadata(request.bucket, &request.file_id),
            self.store.open_read_stream(request.bucket, &request.file_id),
        )?;
        let (encoding, source) = match metadata.encoding {
            Some(encoding) => (encoding, source),
            None => content::sniff_encoding(source).await,
        };

        let downloads = &self.staging.downloads;
        let artifact = reclaim_on_failure(
            downloads,
            stage_stream(downloads, source, &request.filename, None).await,
        )
        .await?;
        debug!(
            bucket = %request.bucket,
            stored_length = metadata.length,
            path = ?artifact.path(),
            "staged stored file"
        );

        let transform = request.bucket.outbound_transform();
        let content_type = match transform {
            Some(_) => self.config.encrypted_content_type.clone(),
            None => metadata.content_type,
        };

        self.serve(
            artifact,
            slot,
            transform,
            &content_type,
            Some(&encoding),
            &request.filename,
        )
        .await
    }

    /// Generate a file, encrypt it and deliver it
    ///
    /// `producer` writes the content after the byte-order mark and `prefix`;
    /// see [`stage_generated`]. The file is staged under a random name and
    /// downloaded as `filename`.
    ///
    /// # Errors
    ///
    /// Staging errors (a failing producer surfaces as [`Error::StageWrite`])
    /// and gateway errors. The staged file is gone by the time any of them is
    /// returned.
    pub async fn deliver_generated<F, Fut>(
        &self,
        prefix: &str,
        producer: F,
        filename: &str,
    ) -> Result<Delivery>
    where
        F: FnOnce(ArtifactWriter) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.deliver_generated_inner(prefix, producer, filename)
            .await
            .inspect_err(|e| error!(filename, error = %e, "generated delivery failed"))
    }

    async fn deliver_generated_inner<F, Fut>(
        &self,
        prefix: &str,
        producer: F,
        filename: &str,
    ) -> Result<Delivery>
    where
        F: FnOnce(ArtifactWriter) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let slot = self.acquire_slot().await?;

        let downloads = &self.staging.downloads;
        let artifact = reclaim_on_failure(
            downloads,
            stage_generated(downloads, prefix, producer, None).await,
        )
        .await?;

        let content_type = self.config.encrypted_content_type.clone();
        self.serve(
            artifact,
            slot,
            Some(TransformKind::Encrypt),
            &content_type,
            Some(GENERATED_ENCODING),
            filename,
        )
        .await
    }

    /// Stage an inbound upload, transform it and deliver the result
    ///
    /// The upload is staged in the uploads directory under a random name that
    /// keeps the extension of `filename`. The charset is detected from the
    /// transformed file.
    ///
    /// # Errors
    ///
    /// Staging errors and gateway errors. The staged file is gone by the time
    /// any of them is returned.
    pub async fn deliver_upload<S>(
        &self,
        upload: S,
        filename: &str,
        transform: Option<TransformKind>,
    ) -> Result<Delivery>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        self.deliver_upload_inner(upload, filename, transform)
            .await
            .inspect_err(|e| error!(filename, error = %e, "upload delivery failed"))
    }

    async fn deliver_upload_inner<S>(
        &self,
        upload: S,
        filename: &str,
        transform: Option<TransformKind>,
    ) -> Result<Delivery>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        let slot = self.acquire_slot().await?;

        let uploads = &self.staging.uploads;
        let artifact =
            reclaim_on_failure(uploads, stage_stream(uploads, upload, filename, None).await)
                .await?;

        let content_type = match transform {
            Some(TransformKind::Encrypt) => self.config.encrypted_content_type.clone(),
            _ => DEFAULT_CONTENT_TYPE.to_string(),
        };
        self.serve(artifact, slot, transform, &content_type, None, filename)
            .await
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        if self.slots.available_permits() == 0 {
            debug!("all staging slots in use, waiting");
        }
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| Error::Other("delivery pipeline closed".to_string()))
    }

    /// Transform, measure and open the artifact
    ///
    /// Every early return drops `artifact`, which removes the file.
    async fn serve(
        &self,
        artifact: StagedArtifact,
        slot: OwnedSemaphorePermit,
        transform: Option<TransformKind>,
        content_type: &str,
        encoding: Option<&str>,
        filename: &str,
    ) -> Result<Delivery> {
        if let Some(kind) = transform {
            self.gateway.transform(kind, artifact.path()).await?;
        }

        let content_length = artifact.size().await?;
        let encoding = match encoding {
            Some(encoding) => encoding.to_string(),
            None => probe_encoding(&artifact).await?,
        };
        let file = File::open(artifact.path()).await?;

        let headers = DeliveryHeaders {
            content_type: format!("{content_type}; charset={encoding}"),
            cache_control: self.config.cache_control.clone(),
            content_disposition: content_disposition(filename),
            content_length,
        };

        info!(
            filename,
            path = ?artifact.path(),
            bytes = content_length,
            transform = ?transform,
            "serving staged artifact"
        );

        Ok(Delivery {
            headers,
            body: ArtifactBody::new(file, artifact, slot),
        })
    }
}

impl std::fmt::Debug for DeliveryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPipeline")
            .field("staging", &self.staging)
            .field("gateway", &self.gateway)
            .field("available_slots", &self.available_slots())
            .finish_non_exhaustive()
    }
}

async fn probe_encoding(artifact: &StagedArtifact) -> Result<String> {
    let mut head = Vec::with_capacity(ENCODING_PROBE_LEN);
    File::open(artifact.path())
        .await?
        .take(ENCODING_PROBE_LEN as u64)
        .read_to_end(&mut head)
        .await?;
    Ok(content::detect_encoding(&head).to_string())
}

/// Remove the partial file a failed stager leaves behind
async fn reclaim_on_failure(
    manager: &TempArtifactManager,
    staged: Result<StagedArtifact>,
) -> Result<StagedArtifact> {
    if let Err(Error::StageWrite { path, .. }) = &staged {
        manager.remove(std::slice::from_ref(path)).await;
    }
    staged
}

/// `attachment; filename="<url-escaped name>"`
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"",
        urlencoding::encode(filename)
    )
}
