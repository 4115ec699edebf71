//! Security module
//!
//! Provides the pieces around the SMTP handshake that guard it:
//! - [`auth`]: client side of SMTP AUTH (PLAIN, LOGIN)
//! - [`lockout`]: failed-login lockout checked before any network call
//! - [`tls`]: TLS for STARTTLS and implicit TLS connections

pub mod auth;
pub mod lockout;
pub mod tls;

pub use auth::AuthMechanism;
pub use lockout::{FailedLoginTracker, LoginLockout, NoLockout};
pub use tls::TlsConfig;
