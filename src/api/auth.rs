//! Optional API key check for the REST API
//!
//! When `ApiConfig::api_key` is set, every route except the health probe
//! requires a matching `X-Api-Key` header. Download tokens for
//! `/file/read` are checked separately by the route itself.

use crate::error::ApiError;
use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Reject requests without the configured API key
///
/// With `None` configured every request passes through.
pub async fn require_api_key(
    State(expected_api_key): State<Option<String>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_key) = expected_api_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key.as_bytes(), expected_key.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => {
            debug!(path = %request.uri().path(), "rejected request with wrong API key");
            unauthorized_response("Invalid API key")
        }
        None => unauthorized_response("Missing X-Api-Key header"),
    }
}

/// Compares every byte regardless of where the first mismatch is
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn unauthorized_response(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(ApiError::unauthorized(message))).into_response()
}
