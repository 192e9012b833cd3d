//! Route handlers for the REST API
//!
//! - [`files`]: token-authorized downloads and upload decryption
//! - [`export`]: dataset collection export
//! - [`system`]: health and OpenAPI

mod export;
mod files;
mod system;

pub use export::*;
pub use files::*;
pub use system::*;
