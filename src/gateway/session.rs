//! Process-wide gateway session cache
//!
//! The cache is a small state machine:
//!
//! ```text
//! NoSession --get_or_login--> LoggingIn --ok--> HasSession
//!     ^                           |                 |
//!     +---------- error ----------+                 |
//!     +------- invalidate / refresh_after_expiry ---+
//! ```
//!
//! Only one login is ever in flight. Callers arriving while a login runs
//! await the same attempt and observe the same outcome. The login itself
//! runs on a spawned task so a cancelled caller cannot strand the others.

use super::transport::{GatewayOutcome, GatewayTransport};
use crate::error::{Error, Result};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Opaque session id issued by the gateway's `login`
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential(String);

impl SessionCredential {
    /// Wrap a session id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw session id sent as `LoginID`
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionCredential(<redacted>)")
    }
}

/// Outcome of a failed login, cloneable so every waiter gets a copy
#[derive(Clone, Debug)]
enum LoginFailure {
    Rejected { code: String },
    Transport { reason: String },
}

impl From<LoginFailure> for Error {
    fn from(failure: LoginFailure) -> Self {
        match failure {
            LoginFailure::Rejected { code } => Error::LoginFailed { code },
            LoginFailure::Transport { reason } => Error::Transport {
                call: "login".to_string(),
                reason,
            },
        }
    }
}

type LoginAttempt = Shared<BoxFuture<'static, std::result::Result<SessionCredential, LoginFailure>>>;

enum SessionState {
    NoSession,
    LoggingIn { attempt_id: u64, attempt: LoginAttempt },
    HasSession(SessionCredential),
}

struct Account {
    name: String,
    password: String,
}

/// Caches the gateway session credential for the whole process
pub struct SessionCache {
    transport: Arc<dyn GatewayTransport>,
    account: Arc<Account>,
    call_timeout: Duration,
    // never held across an await of the login itself
    state: Mutex<SessionState>,
    logins: AtomicU64,
}

impl SessionCache {
    /// Create an empty cache that logs in with the given account
    pub fn new(
        transport: Arc<dyn GatewayTransport>,
        name: impl Into<String>,
        password: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            account: Arc::new(Account {
                name: name.into(),
                password: password.into(),
            }),
            call_timeout,
            state: Mutex::new(SessionState::NoSession),
            logins: AtomicU64::new(0),
        }
    }

    /// Return the cached credential, logging in first if there is none
    ///
    /// Concurrent callers share a single login; a failed login leaves the
    /// cache empty so the next call tries again.
    ///
    /// # Errors
    ///
    /// - [`Error::LoginFailed`] if the gateway rejected the account
    /// - [`Error::Transport`] if the login call did not complete
    pub async fn get_or_login(&self) -> Result<SessionCredential> {
        let (attempt_id, attempt) = {
            let mut state = self.state.lock().await;
            match &*state {
                SessionState::HasSession(credential) => return Ok(credential.clone()),
                SessionState::LoggingIn {
                    attempt_id,
                    attempt,
                } => (*attempt_id, attempt.clone()),
                SessionState::NoSession => self.begin_login(&mut state),
            }
        };

        self.finish_login(attempt_id, attempt).await
    }

    /// Drop the cached credential
    ///
    /// An in-flight login is abandoned: its waiters still get its result, but
    /// the result is not stored.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = SessionState::NoSession;
        debug!("gateway session invalidated");
    }

    /// Replace a credential the gateway reported as expired
    ///
    /// If the cache still holds `stale`, it is discarded and a new login is
    /// started. If another caller already replaced it (or a login is running),
    /// that newer credential is returned instead, so one expiry observed by
    /// many callers causes one login.
    ///
    /// # Errors
    ///
    /// Same as [`SessionCache::get_or_login`].
    pub async fn refresh_after_expiry(&self, stale: &SessionCredential) -> Result<SessionCredential> {
        let (attempt_id, attempt) = {
            let mut state = self.state.lock().await;
            match &*state {
                SessionState::HasSession(current) if current != stale => {
                    return Ok(current.clone());
                }
                SessionState::LoggingIn {
                    attempt_id,
                    attempt,
                } => (*attempt_id, attempt.clone()),
                _ => self.begin_login(&mut state),
            }
        };

        self.finish_login(attempt_id, attempt).await
    }

    /// Number of login calls issued so far
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    fn begin_login(&self, state: &mut SessionState) -> (u64, LoginAttempt) {
        let attempt_id = self.logins.fetch_add(1, Ordering::SeqCst) + 1;

        let transport = Arc::clone(&self.transport);
        let account = Arc::clone(&self.account);
        let call_timeout = self.call_timeout;
        let task = tokio::spawn(login(transport, account, call_timeout));

        let attempt = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(LoginFailure::Transport {
                    reason: format!("login task ended unexpectedly: {e}"),
                }),
            }
        }
        .boxed()
        .shared();

        debug!(attempt_id, "starting gateway login");
        *state = SessionState::LoggingIn {
            attempt_id,
            attempt: attempt.clone(),
        };
        (attempt_id, attempt)
    }

    async fn finish_login(&self, attempt_id: u64, attempt: LoginAttempt) -> Result<SessionCredential> {
        let result = attempt.await;

        let mut state = self.state.lock().await;
        let still_current = matches!(
            &*state,
            SessionState::LoggingIn { attempt_id: current, .. } if *current == attempt_id
        );
        if still_current {
            *state = match &result {
                Ok(credential) => SessionState::HasSession(credential.clone()),
                Err(_) => SessionState::NoSession,
            };
        }

        result.map_err(Error::from)
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("name", &self.account.name)
            .field("call_timeout", &self.call_timeout)
            .field("logins", &self.login_count())
            .finish_non_exhaustive()
    }
}

async fn login(
    transport: Arc<dyn GatewayTransport>,
    account: Arc<Account>,
    call_timeout: Duration,
) -> std::result::Result<SessionCredential, LoginFailure> {
    let call = transport.login(&account.name, &account.password);
    let reply = match tokio::time::timeout(call_timeout, call).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(Error::Transport { reason, .. })) => {
            warn!(%reason, "gateway login did not complete");
            return Err(LoginFailure::Transport { reason });
        }
        Ok(Err(e)) => {
            warn!(error = %e, "gateway login did not complete");
            return Err(LoginFailure::Transport {
                reason: e.to_string(),
            });
        }
        Err(_) => {
            warn!(timeout = ?call_timeout, "gateway login timed out");
            return Err(LoginFailure::Transport {
                reason: format!("timed out after {call_timeout:?}"),
            });
        }
    };

    match reply.outcome() {
        GatewayOutcome::Success => match reply.login_id {
            Some(id) if !id.is_empty() => {
                info!("gateway login succeeded");
                Ok(SessionCredential::new(id))
            }
            _ => Err(LoginFailure::Transport {
                reason: "login reply carried no session id".to_string(),
            }),
        },
        _ => {
            warn!(code = %reply.code, "gateway rejected login");
            Err(LoginFailure::Rejected { code: reply.code })
        }
    }
}
