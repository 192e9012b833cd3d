//! Error types for sealed-files
//!
//! This module provides the error taxonomy of the delivery pipeline:
//! - Staging failures (directory unavailable, write errors)
//! - Gateway failures (login rejected, session expired, transform rejected, transport)
//! - HTTP status code mapping for API integration
//! - Structured error responses that never echo upstream gateway diagnostics

use crate::gateway::TransformKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for sealed-files operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sealed-files
///
/// Each variant carries enough context to be logged at the pipeline boundary.
/// What reaches an HTTP client is decided by [`ApiError::from`], which keeps
/// gateway descriptions and filesystem paths out of the response body.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "gateway.base_url")
        key: Option<String>,
    },

    /// The staging directory could not be created, is not writable, or refused a new file
    #[error("staging directory {path} unavailable: {reason}")]
    StagingDirUnavailable {
        /// The staging directory
        path: PathBuf,
        /// Why the directory cannot be used
        reason: String,
    },

    /// Writing a staged artifact failed; the partial file at `path` belongs to the caller
    #[error("failed to stage {path}: {reason}")]
    StageWrite {
        /// The partially written artifact
        path: PathBuf,
        /// The underlying write or source-stream failure
        reason: String,
    },

    /// The gateway rejected the login request
    #[error("gateway login failed with code {code}")]
    LoginFailed {
        /// Error code returned by the gateway
        code: String,
    },

    /// The gateway reported that the session credential is no longer valid
    #[error("gateway session expired during {operation}")]
    SessionExpired {
        /// The transform that observed the expiry
        operation: TransformKind,
    },

    /// The gateway rejected a transform request
    #[error("gateway {operation} failed with code {code}: {}", description.as_deref().unwrap_or("no description"))]
    TransformFailed {
        /// The transform that failed
        operation: TransformKind,
        /// Error code returned by the gateway
        code: String,
        /// Gateway-provided description (logged, never returned to clients)
        description: Option<String>,
    },

    /// A gateway call could not complete (connection, HTTP status, timeout, malformed reply)
    #[error("gateway call {call} did not complete: {reason}")]
    Transport {
        /// The upstream function that was called ("login", "encryptFile", ...)
        call: String,
        /// What went wrong
        reason: String,
    },

    /// The content store failed to supply metadata or bytes
    #[error("content store error: {0}")]
    ContentStore(String),

    /// Requested content does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The request could not be authorized
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid request input
    #[error("invalid request: {0}")]
    Validation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error came from the encryption gateway
    pub fn is_gateway_error(&self) -> bool {
        matches!(
            self,
            Error::LoginFailed { .. }
                | Error::SessionExpired { .. }
                | Error::TransformFailed { .. }
                | Error::Transport { .. }
        )
    }
}

/// API error response format
///
/// This structure is returned by API endpoints when a delivery fails before
/// any byte of the artifact was sent.
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "transform_failed",
///     "message": "file transform failed"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "not_found", "transform_failed")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create an API error with additional details
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Create an "unauthorized" error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("unauthorized", message)
    }

    /// Create a "rate limited" error carrying the retry delay
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::with_details(
            "rate_limited",
            "Too many requests",
            serde_json::json!({ "retry_after_seconds": retry_after_seconds }),
        )
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Error::Validation(_) => 400,

            // 401 Unauthorized
            Error::Unauthorized(_) => 401,

            // 404 Not Found
            Error::NotFound(_) => 404,

            // 500 Internal Server Error - Server-side issues
            Error::Config { .. } => 500,
            Error::StagingDirUnavailable { .. } => 500,
            Error::StageWrite { .. } => 500,
            Error::ContentStore(_) => 500,
            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::ApiServerError(_) => 500,
            Error::Other(_) => 500,

            // 502 Bad Gateway - Encryption gateway errors
            Error::LoginFailed { .. } => 502,
            Error::SessionExpired { .. } => 502,
            Error::TransformFailed { .. } => 502,
            Error::Transport { .. } => 502,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::StagingDirUnavailable { .. } => "staging_unavailable",
            Error::StageWrite { .. } => "stage_write_error",
            Error::LoginFailed { .. } => "transform_failed",
            Error::SessionExpired { .. } => "transform_failed",
            Error::TransformFailed { .. } => "transform_failed",
            Error::Transport { .. } => "transform_failed",
            Error::ContentStore(_) => "content_store_error",
            Error::NotFound(_) => "not_found",
            Error::Unauthorized(_) => "unauthorized",
            Error::Validation(_) => "validation_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::ApiServerError(_) => "api_server_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();

        // Only client-caused errors keep their message; everything server-side
        // is reduced to a generic sentence so paths and gateway text stay internal.
        let message = match &error {
            Error::NotFound(_) | Error::Unauthorized(_) | Error::Validation(_) => {
                error.to_string()
            }
            e if e.is_gateway_error() => "file transform failed".to_string(),
            Error::StagingDirUnavailable { .. } | Error::StageWrite { .. } => {
                "failed to prepare file".to_string()
            }
            _ => "internal server error".to_string(),
        };

        ApiError::new(code, message)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Returns (Error, expected_status_code, expected_error_code) for every match arm
    fn all_error_variants() -> Vec<(Error, u16, &'static str)> {
        vec![
            (
                Error::Config {
                    message: "bad value".into(),
                    key: Some("gateway.base_url".into()),
                },
                500,
                "config_error",
            ),
            (
                Error::StagingDirUnavailable {
                    path: PathBuf::from("/app/data/download"),
                    reason: "read-only file system".into(),
                },
                500,
                "staging_unavailable",
            ),
            (
                Error::StageWrite {
                    path: PathBuf::from("/app/data/download/x.csv"),
                    reason: "disk full".into(),
                },
                500,
                "stage_write_error",
            ),
            (
                Error::LoginFailed {
                    code: "1001".into(),
                },
                502,
                "transform_failed",
            ),
            (
                Error::SessionExpired {
                    operation: TransformKind::Encrypt,
                },
                502,
                "transform_failed",
            ),
            (
                Error::TransformFailed {
                    operation: TransformKind::Decrypt,
                    code: "5".into(),
                    description: Some("file locked".into()),
                },
                502,
                "transform_failed",
            ),
            (
                Error::Transport {
                    call: "encryptFile".into(),
                    reason: "connection refused".into(),
                },
                502,
                "transform_failed",
            ),
            (
                Error::ContentStore("gridfs down".into()),
                500,
                "content_store_error",
            ),
            (Error::NotFound("file abc".into()), 404, "not_found"),
            (Error::Unauthorized("bad token".into()), 401, "unauthorized"),
            (Error::Validation("empty id".into()), 400, "validation_error"),
            (
                Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone")),
                500,
                "io_error",
            ),
            (
                Error::ApiServerError("bind failed".into()),
                500,
                "api_server_error",
            ),
            (Error::Other("unknown".into()), 500, "internal_error"),
        ]
    }

    #[test]
    fn every_variant_maps_to_expected_status_code() {
        for (error, expected_status, _) in all_error_variants() {
            assert_eq!(
                error.status_code(),
                expected_status,
                "wrong status for {error:?}"
            );
        }
    }

    #[test]
    fn every_variant_maps_to_expected_error_code() {
        for (error, _, expected_code) in all_error_variants() {
            assert_eq!(error.error_code(), expected_code, "wrong code for {error:?}");
        }
    }

    #[test]
    fn gateway_description_is_not_exposed_to_clients() {
        let error = Error::TransformFailed {
            operation: TransformKind::Encrypt,
            code: "77".into(),
            description: Some("license server at 10.0.0.4 unreachable".into()),
        };
        assert!(error.to_string().contains("10.0.0.4"));

        let api_error: ApiError = error.into();
        assert_eq!(api_error.error.code, "transform_failed");
        assert_eq!(api_error.error.message, "file transform failed");
        assert!(api_error.error.details.is_none());
    }

    #[test]
    fn staging_paths_are_not_exposed_to_clients() {
        let error = Error::StageWrite {
            path: PathBuf::from("/app/data/fastgptTempfiles/download/abc.pdf"),
            reason: "No space left on device".into(),
        };
        let api_error: ApiError = error.into();
        assert!(!api_error.error.message.contains("fastgptTempfiles"));
        assert_eq!(api_error.error.message, "failed to prepare file");
    }

    #[test]
    fn client_errors_keep_their_message() {
        let api_error: ApiError = Error::NotFound("file 42".into()).into();
        assert_eq!(api_error.error.code, "not_found");
        assert!(api_error.error.message.contains("file 42"));
    }

    #[test]
    fn only_gateway_variants_are_gateway_errors() {
        let gateway_errors = all_error_variants()
            .into_iter()
            .filter(|(e, _, _)| e.is_gateway_error())
            .count();
        assert_eq!(gateway_errors, 4);
    }

    #[test]
    fn rate_limited_error_carries_retry_delay() {
        let api_error = ApiError::rate_limited(42);
        assert_eq!(api_error.error.code, "rate_limited");
        assert_eq!(api_error.error.details.unwrap()["retry_after_seconds"], 42);
    }
}
