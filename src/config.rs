//! Configuration types for sealed-files

use serde::{Deserialize, Serialize};
use std::{fmt, net::SocketAddr, path::PathBuf, time::Duration};

/// Environment variable holding the gateway base URL
pub const ENV_GATEWAY_BASE_URL: &str = "ENCRYPTION_BASE_URL";
/// Environment variable holding the gateway account name
pub const ENV_GATEWAY_NAME: &str = "ENCRYPTION_NAME";
/// Environment variable holding the gateway account secret
pub const ENV_GATEWAY_PASSWORD: &str = "ENCRYPTION_PASSWORD";

/// Main configuration
///
/// Fields are organized into sub-configs:
/// - [`gateway`](GatewayConfig) - encryption gateway endpoint and account
/// - [`staging`](StagingConfig) - temporary artifact directories and bounds
/// - [`delivery`](DeliveryConfig) - response headers for served artifacts
/// - [`export`](ExportConfig) - CSV export settings
/// - [`api`](ApiConfig) - REST server settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Encryption gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Staging directories and limits
    #[serde(default)]
    pub staging: StagingConfig,

    /// Response header settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// CSV export settings
    #[serde(default)]
    pub export: ExportConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

/// Encryption gateway configuration
///
/// When any of `base_url`, `name` or `password` is missing the gateway is
/// disabled and every transform passes the file through unchanged.
#[derive(Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the gateway; calls go to `{base_url}/{function}`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Account name used for login
    #[serde(default)]
    pub name: Option<String>,

    /// Account secret used for login
    #[serde(default)]
    pub password: Option<String>,

    /// Timeout for each individual gateway call in seconds (default: 30)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Security policy GUID attached to encrypt requests
    #[serde(default = "default_policy_guid")]
    pub policy_guid: String,

    /// Setting level attached to encrypt requests (default: "0")
    #[serde(default = "default_level")]
    pub setting_level: String,

    /// Access level attached to encrypt requests (default: "0")
    #[serde(default = "default_level")]
    pub access_level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            name: None,
            password: None,
            request_timeout: default_request_timeout(),
            policy_guid: default_policy_guid(),
            setting_level: default_level(),
            access_level: default_level(),
        }
    }
}

impl GatewayConfig {
    /// Read the gateway endpoint and account from the environment
    ///
    /// Unset or empty variables leave the corresponding field empty, which
    /// disables the gateway.
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            base_url: read(ENV_GATEWAY_BASE_URL),
            name: read(ENV_GATEWAY_NAME),
            password: read(ENV_GATEWAY_PASSWORD),
            ..Default::default()
        }
    }

    /// Whether all three credential fields are present
    pub fn is_enabled(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        present(&self.base_url) && present(&self.name) && present(&self.password)
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("name", &self.name)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("policy_guid", &self.policy_guid)
            .field("setting_level", &self.setting_level)
            .field("access_level", &self.access_level)
            .finish()
    }
}

/// Staging directory configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Directory for inbound uploads (default: "/app/data/fastgptTempfiles/upload/")
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Directory for outbound downloads and generated exports
    /// (default: "/app/data/fastgptTempfiles/download/")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum number of artifacts staged at the same time across all requests (default: 64)
    ///
    /// Further deliveries wait for a slot instead of filling the disk.
    #[serde(default = "default_max_staged_artifacts")]
    pub max_staged_artifacts: usize,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            download_dir: default_download_dir(),
            max_staged_artifacts: default_max_staged_artifacts(),
        }
    }
}

/// Response header configuration for delivered artifacts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Cache-Control header value (default: "public, max-age=31536000")
    #[serde(default = "default_cache_control")]
    pub cache_control: String,

    /// Content type announced for encrypted artifacts (default: "application/octet-stream")
    #[serde(default = "default_encrypted_content_type")]
    pub encrypted_content_type: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            cache_control: default_cache_control(),
            encrypted_content_type: default_encrypted_content_type(),
        }
    }
}

/// CSV export configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Download filename of the export (default: "data.csv")
    #[serde(default = "default_export_filename")]
    pub filename: String,

    /// Header line written after the byte-order mark (default: "index,content")
    #[serde(default = "default_export_header")]
    pub header: String,

    /// Maximum number of rows written per export (default: 50000)
    #[serde(default = "default_export_max_rows")]
    pub max_rows: usize,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            filename: default_export_filename(),
            header: default_export_header(),
            max_rows: default_export_max_rows(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Optional API key for authentication
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Serve Swagger UI at `/swagger-ui` (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,

    /// Largest accepted upload body in bytes (default: 500 MiB)
    #[serde(default = "default_max_upload_size")]
    pub max_upload_size: usize,

    /// Rate limit applied to the export endpoint
    #[serde(default)]
    pub export_rate_limit: RateLimitConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
            max_upload_size: default_max_upload_size(),
            export_rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Per-IP rate limiting configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable rate limiting (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Requests allowed per window per IP (default: 1)
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    /// Window length in seconds (default: 60)
    #[serde(default = "default_rate_window", with = "duration_serde")]
    pub window: Duration,

    /// IPs exempt from rate limiting
    #[serde(default)]
    pub exempt_ips: Vec<std::net::IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: default_requests_per_window(),
            window: default_rate_window(),
            exempt_ips: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_policy_guid() -> String {
    "00000000-0000-0000-0000-000000000000".to_string()
}

fn default_level() -> String {
    "0".to_string()
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("/app/data/fastgptTempfiles/upload/")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("/app/data/fastgptTempfiles/download/")
}

fn default_max_staged_artifacts() -> usize {
    64
}

fn default_cache_control() -> String {
    "public, max-age=31536000".to_string()
}

fn default_encrypted_content_type() -> String {
    "application/octet-stream".to_string()
}

fn default_export_filename() -> String {
    "data.csv".to_string()
}

fn default_export_header() -> String {
    "index,content".to_string()
}

fn default_export_max_rows() -> usize {
    50_000
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_upload_size() -> usize {
    500 * 1024 * 1024
}

fn default_requests_per_window() -> u32 {
    1
}

fn default_rate_window() -> Duration {
    Duration::from_secs(60)
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
