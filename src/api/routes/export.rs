//! Dataset export handler

use crate::api::AppState;
use crate::delivery::Delivery;
use crate::error::Result;
use crate::export::{ExportQuery, export_collection};
use axum::{Json, extract::State};

/// POST /dataset/collection/export - Export a collection as encrypted CSV
#[utoipa::path(
    post,
    path = "/dataset/collection/export",
    tag = "dataset",
    request_body = ExportQuery,
    responses(
        (status = 200, description = "Encrypted CSV export", content_type = "application/octet-stream"),
        (status = 400, description = "Invalid request", body = crate::error::ApiError),
        (status = 404, description = "Collection not found", body = crate::error::ApiError),
        (status = 429, description = "Too many exports from this client", body = crate::error::ApiError),
        (status = 502, description = "Encryption gateway failure", body = crate::error::ApiError)
    )
)]
pub async fn export_dataset_collection(
    State(state): State<AppState>,
    Json(query): Json<ExportQuery>,
) -> Result<Delivery> {
    export_collection(
        &state.pipeline,
        state.dataset.as_ref(),
        &query,
        &state.config.export,
    )
    .await
}
