//! Client side of SMTP AUTH
//!
//! # Supported mechanisms
//! - CRAM-MD5 (RFC 2195)
//! - PLAIN (RFC 4616)
//! - LOGIN (common but not standardized)
//!
//! Advertised mechanisms are tried in that order until one succeeds.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use md5::Md5;

type HmacMd5 = Hmac<Md5>;

/// SMTP authentication mechanisms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMechanism {
    /// CRAM-MD5 challenge-response (RFC 2195)
    CramMd5,
    /// PLAIN mechanism (RFC 4616)
    Plain,
    /// LOGIN mechanism
    Login,
}

impl AuthMechanism {
    /// Order in which advertised mechanisms are attempted
    pub const PREFERENCE: [Self; 3] = [Self::CramMd5, Self::Plain, Self::Login];

    /// Parse mechanism from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CRAM-MD5" => Some(Self::CramMd5),
            "PLAIN" => Some(Self::Plain),
            "LOGIN" => Some(Self::Login),
            _ => None,
        }
    }

    /// Get mechanism name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CramMd5 => "CRAM-MD5",
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
        }
    }

    /// Supported mechanisms among those an EHLO reply advertised, most
    /// preferred first
    pub fn negotiate<S: AsRef<str>>(advertised: &[S]) -> Vec<Self> {
        let offered: Vec<Self> = advertised
            .iter()
            .filter_map(|name| Self::from_str(name.as_ref()))
            .collect();

        Self::PREFERENCE
            .into_iter()
            .filter(|mechanism| offered.contains(mechanism))
            .collect()
    }
}

/// Encode PLAIN authentication data
///
/// Format: `\0username\0password` (base64 encoded), with an empty
/// authorization identity
pub fn encode_plain(username: &str, password: &str) -> String {
    BASE64.encode(format!("\0{}\0{}", username, password))
}

/// Encode one LOGIN credential (username or password)
pub fn encode_login_credential(credential: &str) -> String {
    BASE64.encode(credential)
}

/// Decode a base64 server challenge such as `VXNlcm5hbWU6`
pub fn decode_challenge(challenge: &str) -> Option<String> {
    BASE64
        .decode(challenge.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Answer a CRAM-MD5 challenge: base64 of `username hex(hmac_md5(password, challenge))`.
///
/// `None` when the challenge is not valid base64.
pub fn encode_cram_md5(username: &str, password: &str, challenge: &str) -> Option<String> {
    let challenge = decode_challenge(challenge)?;

    let mut mac = HmacMd5::new_from_slice(password.as_bytes()).ok()?;
    mac.update(challenge.as_bytes());
    let digest: String = mac
        .finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();

    Some(BASE64.encode(format!("{} {}", username, digest)))
}
