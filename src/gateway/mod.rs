//! Encryption gateway client
//!
//! The gateway encrypts or decrypts files in place, addressed by their path
//! on a filesystem it shares with this process. Every transform call needs a
//! session credential obtained by logging in with the configured account.
//!
//! - [`transport`] - the three upstream calls (`login`, `encryptFile`, `decryptFile`)
//! - [`session`] - process-wide credential cache with single-flight login
//! - [`client`] - `encrypt` / `decrypt` with one retry after session expiry

pub mod client;
pub mod session;
pub mod transport;

pub use client::GatewayClient;
pub use session::{SessionCache, SessionCredential};
pub use transport::{
    EncryptParams, GatewayOutcome, GatewayReply, GatewayTransport, HttpGatewayTransport,
    SESSION_EXPIRED_CODE, SUCCESS_CODE,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The two transforms the gateway performs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Encrypt the file in place
    Encrypt,
    /// Decrypt the file in place
    Decrypt,
}

impl TransformKind {
    /// Name of the upstream function implementing this transform
    pub fn function_name(self) -> &'static str {
        match self {
            TransformKind::Encrypt => "encryptFile",
            TransformKind::Decrypt => "decryptFile",
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformKind::Encrypt => f.write_str("encrypt"),
            TransformKind::Decrypt => f.write_str("decrypt"),
        }
    }
}
