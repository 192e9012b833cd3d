//! REST API server module
//!
//! Exposes the delivery pipeline over HTTP: token-authorized downloads,
//! dataset exports and upload decryption, each answered with a streamed
//! file whose staged artifact is removed once the response is over.

use crate::{Result, error::Error};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// - `GET /file/read/:filename?token=` - Download a stored file (token-authorized)
/// - `POST /file/decrypt/:filename` - Decrypt a raw uploaded body (API key, size-limited)
/// - `POST /dataset/collection/export` - Export a collection as encrypted CSV (API key, rate-limited)
/// - `GET /health` - Health check
/// - `GET /openapi.json` - OpenAPI specification
/// - `GET /swagger-ui` - Interactive documentation (if enabled)
pub fn create_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);
    let api = &config.api;

    let export = if api.export_rate_limit.enabled {
        let limiter = Arc::new(rate_limit::RateLimiter::new(api.export_rate_limit.clone()));
        post(routes::export_dataset_collection).route_layer(middleware::from_fn_with_state(
            limiter,
            rate_limit::rate_limit_middleware,
        ))
    } else {
        post(routes::export_dataset_collection)
    };

    let decrypt =
        post(routes::decrypt_upload).layer(RequestBodyLimitLayer::new(api.max_upload_size));

    // Download links carry their own token, so only these need the API key
    let protected = Router::new()
        .route("/dataset/collection/export", export)
        .route("/file/decrypt/:filename", decrypt)
        .route("/openapi.json", get(routes::openapi_spec));

    let protected = if api.api_key.is_some() {
        protected.route_layer(middleware::from_fn_with_state(
            api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        protected
    };

    let router = Router::new()
        .route("/file/read/:filename", get(routes::read_file))
        .route("/health", get(routes::health_check))
        .merge(protected);

    let router = if api.swagger_ui {
        router.merge(SwaggerUi::new("/swagger-ui").url("/swagger-ui/openapi.json", ApiDoc::openapi()))
    } else {
        router
    };

    let router = router.with_state(state).layer(TraceLayer::new_for_http());

    if api.cors_enabled {
        router.layer(build_cors_layer(&api.cors_origins))
    } else {
        router
    }
}

/// Build a CORS layer for the configured origins ("*" or empty allows any)
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    let cors = if allow_any || origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(allowed))
    };

    cors.allow_methods(Any).allow_headers(Any)
}

/// Start the API server on the configured bind address
///
/// Runs until the server fails; see [`serve`] for graceful shutdown.
///
/// # Example
///
/// ```no_run
/// use sealed_files::api::{AppState, start_api_server};
/// use sealed_files::content::{FsContentStore, StaticFileTokens};
/// use sealed_files::export::{DatasetRows, ExportQuery, RowCursor};
/// use sealed_files::{Config, Error, Result};
/// use std::sync::Arc;
///
/// struct NoDatasets;
///
/// #[async_trait::async_trait]
/// impl DatasetRows for NoDatasets {
///     async fn open_cursor(&self, query: &ExportQuery) -> Result<RowCursor> {
///         Err(Error::NotFound(format!("collection {}", query.collection_id)))
///     }
/// }
///
/// # async fn example() -> Result<()> {
/// let state = AppState::new(
///     Config::default(),
///     Arc::new(FsContentStore::new("/srv/files")),
///     Arc::new(StaticFileTokens::new()),
///     Arc::new(NoDatasets),
/// )?;
/// start_api_server(state).await?;
/// # Ok(())
/// # }
/// ```
pub async fn start_api_server(state: AppState) -> Result<()> {
    let bind_address = state.config.api.bind_address;

    tracing::info!(address = %bind_address, "Starting API server");

    let listener = TcpListener::bind(bind_address).await.map_err(Error::Io)?;

    serve(listener, state, std::future::pending()).await
}

/// Serve the API on an already bound listener until `shutdown` resolves
///
/// In-flight responses are allowed to finish, so their staged artifacts are
/// still removed.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    if let Ok(address) = listener.local_addr() {
        tracing::info!(address = %address, "API server listening");
    }

    // ConnectInfo is required by the rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
