//! HTTP response conversions for the API
//!
//! Domain errors become JSON error bodies with their mapped status code;
//! prepared deliveries become streaming file responses.

use crate::delivery::Delivery;
use crate::error::{ApiError, Error, ToHttpStatus};
use axum::{
    Json,
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Implement IntoResponse for Error to automatically convert errors to HTTP responses
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let api_error: ApiError = self.into();

        (status_code, Json(api_error)).into_response()
    }
}

/// Implement IntoResponse for ApiError for explicit error responses
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // errors with a known status go through Error::into_response instead
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self)).into_response()
    }
}

/// Stream a prepared delivery with its headers
///
/// The body owns the staged artifact, so the file is removed when hyper
/// finishes or abandons the response.
impl IntoResponse for Delivery {
    fn into_response(self) -> Response {
        let Delivery { headers, body } = self;

        let mut response = Response::new(Body::from_stream(body));
        let map = response.headers_mut();
        insert_or_fallback(
            map,
            CONTENT_TYPE,
            &headers.content_type,
            "application/octet-stream",
        );
        insert_or_fallback(map, CACHE_CONTROL, &headers.cache_control, "no-store");
        insert_or_fallback(
            map,
            CONTENT_DISPOSITION,
            &headers.content_disposition,
            "attachment",
        );
        map.insert(CONTENT_LENGTH, HeaderValue::from(headers.content_length));

        response
    }
}

fn insert_or_fallback(map: &mut HeaderMap, name: HeaderName, value: &str, fallback: &'static str) {
    let value = HeaderValue::from_str(value).unwrap_or_else(|_| {
        warn!(header = %name, value, "invalid header value, using fallback");
        HeaderValue::from_static(fallback)
    });
    map.insert(name, value);
}
