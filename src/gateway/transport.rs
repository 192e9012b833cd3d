//! Gateway wire protocol
//!
//! Each upstream function is a JSON `POST {base_url}/{function}`. Replies
//! carry an `error` code (`"0"` on success), an optional `desc`, and for
//! `login` the session id in `loginid`.

use super::session::SessionCredential;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use url::Url;

/// Error code of a successful call
pub const SUCCESS_CODE: &str = "0";

/// Error code signalling that the session credential is no longer valid
pub const SESSION_EXPIRED_CODE: &str = "61453";

/// Raw gateway reply
#[derive(Clone, Debug, Deserialize)]
pub struct GatewayReply {
    /// Error code; `"0"` means success
    #[serde(rename = "error", deserialize_with = "code_as_string")]
    pub code: String,

    /// Human-readable description of a failure
    #[serde(default)]
    pub desc: Option<String>,

    /// Session id returned by `login`
    #[serde(default, rename = "loginid")]
    pub login_id: Option<String>,
}

/// Classified gateway reply
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// The call succeeded
    Success,
    /// The session credential has expired
    SessionExpired,
    /// Any other non-zero code
    Failed {
        /// Error code returned by the gateway
        code: String,
        /// Gateway-provided description
        description: Option<String>,
    },
}

impl GatewayReply {
    /// Classify the reply by its error code
    pub fn outcome(&self) -> GatewayOutcome {
        match self.code.as_str() {
            SUCCESS_CODE => GatewayOutcome::Success,
            SESSION_EXPIRED_CODE => GatewayOutcome::SessionExpired,
            _ => GatewayOutcome::Failed {
                code: self.code.clone(),
                description: self.desc.clone(),
            },
        }
    }
}

// Gateways disagree on whether the code is a JSON string or number.
fn code_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Text(String),
        Number(i64),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Text(s) => s,
        Code::Number(n) => n.to_string(),
    })
}

/// Security policy entry attached to an encrypt request
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PolicyEntry {
    /// Policy GUID
    pub guid: String,
    /// Policy level
    pub level: String,
}

/// Parameters of an `encryptFile` call
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EncryptParams {
    /// Files to encrypt in place
    pub files: Vec<String>,
    /// Setting policy
    pub setting: Vec<PolicyEntry>,
    /// Access policy
    pub access: Vec<PolicyEntry>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Password")]
    password: &'a str,
}

#[derive(Serialize)]
struct EncryptRequest<'a> {
    #[serde(rename = "LoginID")]
    login_id: &'a str,
    #[serde(rename = "Param")]
    param: &'a EncryptParams,
}

#[derive(Serialize)]
struct DecryptRequest<'a> {
    #[serde(rename = "LoginID")]
    login_id: &'a str,
    #[serde(rename = "File")]
    file: &'a str,
}

/// The three upstream gateway calls
///
/// Implementations return [`Error::Transport`] when a call does not complete
/// (connection failure, non-success HTTP status, unreadable reply). A reply
/// that arrives is returned as-is, whatever its error code.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    /// Log in and obtain a session id
    async fn login(&self, name: &str, password: &str) -> Result<GatewayReply>;

    /// Encrypt files in place
    async fn encrypt_file(
        &self,
        session: &SessionCredential,
        params: &EncryptParams,
    ) -> Result<GatewayReply>;

    /// Decrypt one file in place
    async fn decrypt_file(&self, session: &SessionCredential, path: &Path) -> Result<GatewayReply>;
}

/// HTTP implementation of [`GatewayTransport`]
#[derive(Clone, Debug)]
pub struct HttpGatewayTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGatewayTransport {
    /// Create a transport for the given base URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `base_url` is not an absolute http(s) URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = Url::parse(base_url).map_err(|e| Error::Config {
            message: format!("invalid gateway base URL {base_url:?}: {e}"),
            key: Some("gateway.base_url".to_string()),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Config {
                message: format!("gateway base URL must be http or https, got {base_url:?}"),
                key: Some("gateway.base_url".to_string()),
            });
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send<T: Serialize + ?Sized>(&self, function: &str, body: &T) -> Result<GatewayReply> {
        let transport_error = |reason: String| Error::Transport {
            call: function.to_string(),
            reason,
        };

        let url = format!("{}/{}", self.base_url, function);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport_error(format!("HTTP status {status}")));
        }

        response
            .json::<GatewayReply>()
            .await
            .map_err(|e| transport_error(format!("unreadable reply: {e}")))
    }
}

#[async_trait]
impl GatewayTransport for HttpGatewayTransport {
    async fn login(&self, name: &str, password: &str) -> Result<GatewayReply> {
        self.send("login", &LoginRequest { name, password }).await
    }

    async fn encrypt_file(
        &self,
        session: &SessionCredential,
        params: &EncryptParams,
    ) -> Result<GatewayReply> {
        let request = EncryptRequest {
            login_id: session.as_str(),
            param: params,
        };
        self.send("encryptFile", &request).await
    }

    async fn decrypt_file(&self, session: &SessionCredential, path: &Path) -> Result<GatewayReply> {
        let file = path.to_string_lossy();
        let request = DecryptRequest {
            login_id: session.as_str(),
            file: &file,
        };
        self.send("decryptFile", &request).await
    }
}
