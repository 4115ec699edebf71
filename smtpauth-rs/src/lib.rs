//! smtpauth-rs: mail logins verified by the upstream SMTP server
//!
//! The platform never stores mailbox passwords. Instead, each login of the
//! form `user@domain` is checked by logging in to the SMTP server an
//! administrator configured for that domain.
//!
//! # Features
//!
//! - **Alias aware**: `user@alias` is verified and reported as
//!   `user@canonical-domain`
//! - **Login rewriting**: split addresses (bare username) and per-domain
//!   templates such as `%u@corp.com`
//! - **Transport security**: implicit TLS on port 465, STARTTLS elsewhere
//!   whenever the server offers it
//! - **Uniform denial**: callers only ever learn "accepted as X" or "denied"
//!
//! # Example
//!
//! ```no_run
//! use smtpauth_rs::authenticator::{AuthOutcome, IdentityAuthenticator, SmtpAuthenticator};
//! use smtpauth_rs::identity::{AuthContext, Identity};
//! use smtpauth_rs::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("smtpauth.toml")?;
//!     let authenticator = SmtpAuthenticator::from_config(&config).await?;
//!
//!     let identity = Identity::new("jane@alias.co", "secret");
//!     match authenticator.authenticate(&identity, &AuthContext::default()).await {
//!         AuthOutcome::Accepted(login) => println!("welcome {}", login),
//!         AuthOutcome::Denied => println!("denied"),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`authenticator`]: the end-to-end authentication flow
//! - [`config`]: Configuration management
//! - [`directory`]: domain and alias resolution to SMTP endpoints
//! - [`error`]: Error types and handling
//! - [`identity`]: login identities
//! - [`security`]: lockout, TLS and AUTH mechanisms
//! - [`smtp`]: SMTP client and credential verifier
//! - [`template`]: per-domain login templates

pub mod authenticator;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod security;
pub mod smtp;
pub mod template;

// Re-export commonly used types
pub use authenticator::{AuthOutcome, IdentityAuthenticator, SmtpAuthenticator};
pub use config::Config;
pub use error::{AuthError, Result};
pub use identity::{AuthContext, Identity};
