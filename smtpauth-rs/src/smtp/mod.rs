//! SMTP credential verification
//!
//! - [`response`]: reply and EHLO capability parsing
//! - [`client`]: client connection (greeting, EHLO, STARTTLS, AUTH, QUIT)
//! - [`verifier`]: port policy and the scoped login handshake

pub mod client;
pub mod response;
pub mod verifier;

pub use client::SmtpClient;
pub use response::{Capabilities, Reply};
pub use verifier::{ConnectionPolicy, CredentialVerifier, Security, SmtpVerifier};
