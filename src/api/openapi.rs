//! OpenAPI documentation and schema generation

use utoipa::OpenApi;

/// OpenAPI documentation for the sealed-files REST API
///
/// Served at `/openapi.json` and, when enabled, browsable at `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "sealed-files REST API",
        version = "0.1.0",
        description = "Downloads and dataset exports encrypted through an external encryption gateway",
        license(
            name = "MIT OR Apache-2.0"
        )
    ),
    servers(
        (url = "http://localhost:6790", description = "Local development server")
    ),
    paths(
        crate::api::routes::read_file,
        crate::api::routes::decrypt_upload,
        crate::api::routes::export_dataset_collection,
        crate::api::routes::health_check,
        crate::api::routes::openapi_spec,
    ),
    components(
        schemas(
            crate::error::ApiError,
            crate::error::ErrorDetail,
            crate::export::ExportQuery,
            crate::content::Bucket,
        )
    ),
    tags(
        (name = "files", description = "Stored file downloads and upload decryption"),
        (name = "dataset", description = "Dataset collection exports"),
        (name = "system", description = "Health and API documentation")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// Adds the `X-Api-Key` header scheme
struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = &mut openapi.components {
            components.add_security_scheme(
                "api_key",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-Api-Key"),
                    ),
                ),
            );
        }
    }
}
