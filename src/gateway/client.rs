//! Encrypt and decrypt files through the gateway

use super::TransformKind;
use super::session::{SessionCache, SessionCredential};
use super::transport::{
    EncryptParams, GatewayOutcome, GatewayTransport, HttpGatewayTransport, PolicyEntry,
    SESSION_EXPIRED_CODE,
};
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a transform stands in its retry cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    Initial,
    RetryingAfterExpiry,
}

struct Policy {
    guid: String,
    setting_level: String,
    access_level: String,
}

struct EnabledGateway {
    transport: Arc<dyn GatewayTransport>,
    sessions: SessionCache,
    policy: Policy,
    call_timeout: Duration,
}

/// Gateway client shared by all requests
///
/// Built from [`GatewayConfig`]. Without a complete configuration the client
/// is disabled and [`encrypt`](Self::encrypt) / [`decrypt`](Self::decrypt)
/// succeed without touching the file.
pub struct GatewayClient {
    inner: Option<EnabledGateway>,
}

impl GatewayClient {
    /// Build a client that talks HTTP to the configured gateway
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the gateway is enabled but its base URL is invalid.
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        match config.base_url.as_deref() {
            Some(base_url) if config.is_enabled() => {
                let transport = HttpGatewayTransport::new(base_url)?;
                Ok(Self::with_transport(config, Arc::new(transport)))
            }
            _ => {
                info!("encryption gateway not configured, files are delivered unchanged");
                Ok(Self::disabled())
            }
        }
    }

    /// Build a client over a custom transport
    ///
    /// The account and policy still come from `config`; if it is incomplete
    /// the client is disabled.
    pub fn with_transport(config: &GatewayConfig, transport: Arc<dyn GatewayTransport>) -> Self {
        let (Some(name), Some(password)) = (config.name.as_deref(), config.password.as_deref())
        else {
            return Self::disabled();
        };
        if !config.is_enabled() {
            return Self::disabled();
        }

        let sessions = SessionCache::new(
            Arc::clone(&transport),
            name,
            password,
            config.request_timeout,
        );
        Self {
            inner: Some(EnabledGateway {
                transport,
                sessions,
                policy: Policy {
                    guid: config.policy_guid.clone(),
                    setting_level: config.setting_level.clone(),
                    access_level: config.access_level.clone(),
                },
                call_timeout: config.request_timeout,
            }),
        }
    }

    /// A client that never calls the gateway
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Whether transforms reach the gateway
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// The session cache, if the gateway is enabled
    pub fn sessions(&self) -> Option<&SessionCache> {
        self.inner.as_ref().map(|g| &g.sessions)
    }

    /// Encrypt the file at `path` in place
    pub async fn encrypt(&self, path: &Path) -> Result<()> {
        self.transform(TransformKind::Encrypt, path).await
    }

    /// Decrypt the file at `path` in place
    pub async fn decrypt(&self, path: &Path) -> Result<()> {
        self.transform(TransformKind::Decrypt, path).await
    }

    /// Run `kind` on the file at `path`
    ///
    /// A session expiry is answered with one re-login and one retry. A second
    /// expiry, or any other failure, is returned to the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::LoginFailed`] / [`Error::Transport`] from obtaining a session
    /// - [`Error::TransformFailed`] if the gateway rejected the file
    /// - [`Error::Transport`] if the call did not complete in time
    pub async fn transform(&self, kind: TransformKind, path: &Path) -> Result<()> {
        let Some(gateway) = &self.inner else {
            debug!(operation = %kind, ?path, "gateway disabled, passing file through");
            return Ok(());
        };
        gateway.run(kind, path).await
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl EnabledGateway {
    async fn run(&self, kind: TransformKind, path: &Path) -> Result<()> {
        let mut session = self.sessions.get_or_login().await?;
        let mut attempt = Attempt::Initial;

        loop {
            match (self.call_once(kind, &session, path).await, attempt) {
                (Ok(()), _) => {
                    debug!(operation = %kind, ?path, "gateway transform succeeded");
                    return Ok(());
                }
                (Err(Error::SessionExpired { .. }), Attempt::Initial) => {
                    warn!(operation = %kind, "gateway session expired, logging in again");
                    session = self.sessions.refresh_after_expiry(&session).await?;
                    attempt = Attempt::RetryingAfterExpiry;
                }
                (Err(Error::SessionExpired { operation }), Attempt::RetryingAfterExpiry) => {
                    return Err(Error::TransformFailed {
                        operation,
                        code: SESSION_EXPIRED_CODE.to_string(),
                        description: Some("session expired again after re-login".to_string()),
                    });
                }
                (Err(e), _) => return Err(e),
            }
        }
    }

    async fn call_once(
        &self,
        kind: TransformKind,
        session: &SessionCredential,
        path: &Path,
    ) -> Result<()> {
        let params = self.encrypt_params(path);
        let pending = match kind {
            TransformKind::Encrypt => self.transport.encrypt_file(session, &params),
            TransformKind::Decrypt => self.transport.decrypt_file(session, path),
        };

        let reply = tokio::time::timeout(self.call_timeout, pending)
            .await
            .map_err(|_| Error::Transport {
                call: kind.function_name().to_string(),
                reason: format!("timed out after {:?}", self.call_timeout),
            })??;

        match reply.outcome() {
            GatewayOutcome::Success => Ok(()),
            GatewayOutcome::SessionExpired => Err(Error::SessionExpired { operation: kind }),
            GatewayOutcome::Failed { code, description } => Err(Error::TransformFailed {
                operation: kind,
                code,
                description,
            }),
        }
    }

    fn encrypt_params(&self, path: &Path) -> EncryptParams {
        EncryptParams {
            files: vec![path.to_string_lossy().into_owned()],
            setting: vec![PolicyEntry {
                guid: self.policy.guid.clone(),
                level: self.policy.setting_level.clone(),
            }],
            access: vec![PolicyEntry {
                guid: self.policy.guid.clone(),
                level: self.policy.access_level.clone(),
            }],
        }
    }
}
