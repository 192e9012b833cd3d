//! Gateway credentials for live tests, loaded from `.env`

use sealed_files::GatewayConfig;

/// Load the live gateway configuration
///
/// Reads `ENCRYPTION_BASE_URL`, `ENCRYPTION_NAME` and `ENCRYPTION_PASSWORD`
/// after loading `.env`.
pub fn load_gateway_config() -> GatewayConfig {
    dotenvy::dotenv().ok();
    GatewayConfig::from_env()
}

/// Check if live gateway credentials are available
pub fn has_live_credentials() -> bool {
    load_gateway_config().is_enabled()
}

/// Skip test if credentials are not available
#[macro_export]
macro_rules! skip_if_no_credentials {
    () => {
        if !$crate::common::has_live_credentials() {
            eprintln!("Skipping test: encryption gateway credentials not found in .env");
            return;
        }
    };
}
