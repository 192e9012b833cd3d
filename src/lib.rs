//! # sealed-files
//!
//! Serves files through an external encryption gateway.
//!
//! Every outbound file is first staged to a local temporary artifact. The
//! gateway encrypts (or decrypts) that artifact in place, and the result is
//! streamed to the client. The artifact is removed however the response ends:
//! completion, client disconnect, or failure.
//!
//! - [`gateway`]: login once, share the session across callers, retry a
//!   transform once after the session expires
//! - [`staging`]: temp artifact allocation and stream staging
//! - [`delivery`]: the stage, transform, serve and clean up pipeline
//! - [`export`]: dataset collections as CSV downloads
//! - [`api`]: the axum REST surface
//!
//! ## Quick Start
//!
//! ```no_run
//! use sealed_files::api::AppState;
//! use sealed_files::content::{Bucket, FsContentStore, StaticFileTokens};
//! use sealed_files::export::{DatasetRows, ExportQuery, RowCursor};
//! use sealed_files::{Config, Error, GatewayConfig, run_with_shutdown};
//! use std::sync::Arc;
//!
//! struct NoDatasets;
//!
//! #[async_trait::async_trait]
//! impl DatasetRows for NoDatasets {
//!     async fn open_cursor(&self, query: &ExportQuery) -> sealed_files::Result<RowCursor> {
//!         Err(Error::NotFound(format!("collection {}", query.collection_id)))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         gateway: GatewayConfig::from_env(),
//!         ..Default::default()
//!     };
//!     let tokens = StaticFileTokens::new().grant("tok-1", Bucket::Dataset, "report.pdf");
//!
//!     let state = AppState::new(
//!         config,
//!         Arc::new(FsContentStore::new("/srv/files")),
//!         Arc::new(tokens),
//!         Arc::new(NoDatasets),
//!     )?;
//!
//!     run_with_shutdown(state).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Content store and download token seams
pub mod content;
/// Staged delivery pipeline
pub mod delivery;
/// Error types
pub mod error;
/// Dataset CSV export
pub mod export;
/// Encryption gateway client
pub mod gateway;
/// Temp artifacts and stream staging
pub mod staging;

// Re-export commonly used types
pub use config::{Config, GatewayConfig};
pub use delivery::{Delivery, DeliveryPipeline, StoredFileRequest};
pub use error::{ApiError, Error, ErrorDetail, Result, ToHttpStatus};
pub use gateway::{GatewayClient, TransformKind};

/// Serve the API until SIGTERM or SIGINT (Ctrl+C on other platforms)
///
/// In-flight downloads finish before this returns, so their staged
/// artifacts are removed.
pub async fn run_with_shutdown(state: api::AppState) -> Result<()> {
    let bind_address = state.config.api.bind_address;
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(address = %bind_address, "Starting API server");

    api::serve(listener, state, wait_for_signal()).await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
