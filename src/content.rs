//! Content store and file-token collaborators
//!
//! Stored files live in named buckets. The delivery pipeline only needs two
//! things from a store (metadata and a byte stream), so the store is a trait;
//! [`FsContentStore`] is a directory-backed implementation.
//!
//! Download links carry a token that resolves to a bucket and file id. Token
//! issuance and verification belong to the host application, behind
//! [`FileTokenVerifier`].

use crate::error::{Error, Result};
use crate::gateway::TransformKind;
use crate::staging::ByteStream;
use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio_util::io::ReaderStream;
use tracing::debug;
use utoipa::ToSchema;

/// Content type used when the store has none on record
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes inspected when guessing the character encoding of a stream
const ENCODING_SAMPLE_LEN: usize = 200;

/// Storage bucket of a file
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Files attached to chat conversations
    Chat,
    /// Source documents of knowledge-base datasets
    Dataset,
}

impl Bucket {
    /// Bucket name as stored
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Chat => "chat",
            Bucket::Dataset => "dataset",
        }
    }

    /// Transform applied before files from this bucket leave the service
    pub fn outbound_transform(self) -> Option<TransformKind> {
        match self {
            Bucket::Chat => None,
            Bucket::Dataset => Some(TransformKind::Encrypt),
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(Bucket::Chat),
            "dataset" => Ok(Bucket::Dataset),
            other => Err(Error::Validation(format!("unknown bucket: {other}"))),
        }
    }
}

/// What the store knows about a file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    /// MIME type recorded at upload
    pub content_type: String,
    /// Stored length in bytes
    pub length: u64,
    /// Character encoding recorded at upload, if any
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Source of stored files
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Look up a file's metadata
    ///
    /// Returns [`Error::NotFound`] if the file does not exist.
    async fn fetch_metadata(&self, bucket: Bucket, file_id: &str) -> Result<ContentMetadata>;

    /// Open the file's bytes as a stream
    async fn open_read_stream(&self, bucket: Bucket, file_id: &str) -> Result<ByteStream>;
}

/// Optional sidecar next to a stored file (`<file_id>.meta.json`)
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Sidecar {
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

/// Directory-backed [`ContentStore`]
///
/// Files live at `<root>/<bucket>/<file_id>`. A JSON sidecar
/// `<file_id>.meta.json` may record `contentType` and `encoding`.
#[derive(Clone, Debug)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    /// Serve files below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_path(&self, bucket: Bucket, file_id: &str) -> Result<PathBuf> {
        let plain = !file_id.is_empty()
            && file_id != "."
            && file_id != ".."
            && !file_id.contains(['/', '\\'])
            && !file_id.ends_with(".meta.json");
        if !plain {
            return Err(Error::Validation(format!("invalid file id: {file_id:?}")));
        }
        Ok(self.root.join(bucket.as_str()).join(file_id))
    }

    async fn read_sidecar(path: &Path) -> Result<Sidecar> {
        let sidecar_path = path.with_file_name(format!(
            "{}.meta.json",
            path.file_name().unwrap_or_default().to_string_lossy()
        ));
        match tokio::fs::read(&sidecar_path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Sidecar::default()),
            Err(e) => Err(Error::ContentStore(format!(
                "failed to read {}: {e}",
                sidecar_path.display()
            ))),
        }
    }
}

fn not_found_or_store(bucket: Bucket, file_id: &str, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound(format!("file {file_id} in bucket {bucket}"))
    } else {
        Error::ContentStore(format!("file {file_id} in bucket {bucket}: {e}"))
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn fetch_metadata(&self, bucket: Bucket, file_id: &str) -> Result<ContentMetadata> {
        let path = self.file_path(bucket, file_id)?;
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_store(bucket, file_id, e))?;
        if !metadata.is_file() {
            return Err(Error::NotFound(format!("file {file_id} in bucket {bucket}")));
        }

        let sidecar = Self::read_sidecar(&path).await?;
        Ok(ContentMetadata {
            content_type: sidecar
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            length: metadata.len(),
            encoding: sidecar.encoding,
        })
    }

    async fn open_read_stream(&self, bucket: Bucket, file_id: &str) -> Result<ByteStream> {
        let path = self.file_path(bucket, file_id)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_store(bucket, file_id, e))?;
        Ok(ReaderStream::new(file).boxed())
    }
}

/// Guess the character encoding of a file from its first bytes
///
/// Byte-order marks win. Otherwise text that is valid UTF-8 (allowing a
/// sequence cut off at the end of the sample) is `utf-8`, and anything else
/// without NUL bytes is assumed to be a legacy single-byte encoding.
pub fn detect_encoding(head: &[u8]) -> &'static str {
    if head.starts_with(b"\xEF\xBB\xBF") {
        return "utf-8";
    }
    if head.starts_with(b"\xFF\xFE") {
        return "utf-16le";
    }
    if head.starts_with(b"\xFE\xFF") {
        return "utf-16be";
    }

    match std::str::from_utf8(head) {
        Ok(_) => "utf-8",
        Err(e) if e.error_len().is_none() => "utf-8",
        Err(_) if !head.contains(&0) => "windows-1252",
        Err(_) => "utf-8",
    }
}

/// Detect the encoding of a stream from its first chunk
///
/// The inspected chunk is put back, so the returned stream yields exactly the
/// bytes of the original.
pub async fn sniff_encoding(mut source: ByteStream) -> (String, ByteStream) {
    match source.next().await {
        Some(Ok(first)) => {
            let sample = &first[..first.len().min(ENCODING_SAMPLE_LEN)];
            let encoding = detect_encoding(sample).to_string();
            debug!(%encoding, "detected content encoding");
            (encoding, stream::iter([Ok(first)]).chain(source).boxed())
        }
        Some(Err(e)) => (
            detect_encoding(&[]).to_string(),
            stream::iter([Err(e)]).chain(source).boxed(),
        ),
        None => (detect_encoding(&[]).to_string(), stream::empty().boxed()),
    }
}

/// Stored file a download token grants access to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileGrant {
    /// Bucket holding the file
    pub bucket: Bucket,
    /// File id inside the bucket
    pub file_id: String,
}

/// Resolves download tokens to stored files
#[async_trait]
pub trait FileTokenVerifier: Send + Sync {
    /// Verify `token` and return the file it grants
    ///
    /// Returns [`Error::Unauthorized`] for unknown, expired or malformed tokens.
    async fn verify(&self, token: &str) -> Result<FileGrant>;
}

/// Fixed token table, for embedding and tests
#[derive(Clone, Debug, Default)]
pub struct StaticFileTokens {
    grants: HashMap<String, FileGrant>,
}

impl StaticFileTokens {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `token` access to one file
    pub fn grant(mut self, token: impl Into<String>, bucket: Bucket, file_id: impl Into<String>) -> Self {
        self.grants.insert(
            token.into(),
            FileGrant {
                bucket,
                file_id: file_id.into(),
            },
        );
        self
    }
}

#[async_trait]
impl FileTokenVerifier for StaticFileTokens {
    async fn verify(&self, token: &str) -> Result<FileGrant> {
        self.grants
            .get(token)
            .cloned()
            .ok_or_else(|| Error::Unauthorized("invalid file token".to_string()))
    }
}
