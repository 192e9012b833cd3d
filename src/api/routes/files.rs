//! File handlers: token-authorized downloads and upload decryption

use crate::api::AppState;
use crate::delivery::{Delivery, StoredFileRequest};
use crate::error::{Error, Result};
use crate::gateway::TransformKind;
use axum::{
    body::Body,
    extract::{Path, Query, State},
};
use futures::TryStreamExt;
use serde::Deserialize;
use tracing::debug;

/// Query parameters of `GET /file/read/{filename}`
#[derive(Debug, Deserialize)]
pub struct ReadFileQuery {
    /// Download token issued for the file
    pub token: Option<String>,
}

/// GET /file/read/:filename - Download a stored file
///
/// Dataset files are encrypted before they are sent.
#[utoipa::path(
    get,
    path = "/file/read/{filename}",
    tag = "files",
    params(
        ("filename" = String, Path, description = "Name the file is downloaded as"),
        ("token" = String, Query, description = "Download token issued for the file")
    ),
    responses(
        (status = 200, description = "File contents", content_type = "application/octet-stream"),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 404, description = "File not found", body = crate::error::ApiError),
        (status = 502, description = "Encryption gateway failure", body = crate::error::ApiError)
    )
)]
pub async fn read_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<ReadFileQuery>,
) -> Result<Delivery> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Unauthorized("file token is required".to_string()))?;

    let grant = state.tokens.verify(&token).await?;
    debug!(bucket = %grant.bucket, file_id = %grant.file_id, %filename, "file read authorized");

    state
        .pipeline
        .deliver_stored(&StoredFileRequest {
            bucket: grant.bucket,
            file_id: grant.file_id,
            filename,
        })
        .await
}

/// POST /file/decrypt/:filename - Decrypt an uploaded file
///
/// The raw request body is staged, decrypted by the gateway and streamed back.
#[utoipa::path(
    post,
    path = "/file/decrypt/{filename}",
    tag = "files",
    params(
        ("filename" = String, Path, description = "Name of the uploaded file")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream", description = "Encrypted file"),
    responses(
        (status = 200, description = "Decrypted file contents", content_type = "application/octet-stream"),
        (status = 413, description = "Upload exceeds the configured size limit"),
        (status = 502, description = "Encryption gateway failure", body = crate::error::ApiError)
    )
)]
pub async fn decrypt_upload(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    body: Body,
) -> Result<Delivery> {
    let upload = body.into_data_stream().map_err(std::io::Error::other);

    state
        .pipeline
        .deliver_upload(upload, &filename, Some(TransformKind::Decrypt))
        .await
}
