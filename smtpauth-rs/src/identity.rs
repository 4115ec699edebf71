//! Login identities presented by end users

use crate::error::{AuthError, Result};
use std::fmt;
use std::net::IpAddr;

/// Credential pair supplied by the identity provider
#[derive(Clone)]
pub struct Identity {
    pub login: String,
    pub password: String,
}

impl Identity {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    /// Split the login into its username and domain parts
    pub fn parse(&self) -> Result<LoginParts<'_>> {
        LoginParts::parse(&self.login)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Request-scoped data passed along with an identity
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub remote_addr: Option<IpAddr>,
}

impl AuthContext {
    pub fn from_remote(remote_addr: IpAddr) -> Self {
        Self {
            remote_addr: Some(remote_addr),
        }
    }
}

/// `username` and `domain` halves of a `user@domain` login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginParts<'a> {
    pub username: &'a str,
    pub domain: &'a str,
}

impl<'a> LoginParts<'a> {
    /// Requires exactly one `@` with something on each side of it.
    pub fn parse(login: &'a str) -> Result<Self> {
        let mut parts = login.split('@');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(username), Some(domain), None) if !username.is_empty() && !domain.is_empty() => {
                Ok(Self { username, domain })
            }
            (_, None, _) => Err(AuthError::MalformedIdentity(
                "login has no domain part".to_string(),
            )),
            (_, Some(_), Some(_)) => Err(AuthError::MalformedIdentity(
                "login has more than one @".to_string(),
            )),
            _ => Err(AuthError::MalformedIdentity(
                "login has an empty username or domain".to_string(),
            )),
        }
    }

    /// `username@domain` with the domain swapped for `domain`
    pub fn with_domain(&self, domain: &str) -> String {
        format!("{}@{}", self.username, domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login() {
        let parts = LoginParts::parse("bob@example.com").unwrap();
        assert_eq!(parts.username, "bob");
        assert_eq!(parts.domain, "example.com");
        assert_eq!(parts.with_domain("corp.com"), "bob@corp.com");
    }

    #[test]
    fn test_parse_rejects_malformed_logins() {
        for login in ["bob", "", "bob@", "@example.com", "a@b@c", "@"] {
            assert!(
                matches!(LoginParts::parse(login), Err(AuthError::MalformedIdentity(_))),
                "{:?} should be malformed",
                login
            );
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let identity = Identity::new("bob@example.com", "hunter2");
        let rendered = format!("{:?}", identity);
        assert!(rendered.contains("bob@example.com"));
        assert!(!rendered.contains("hunter2"));
    }
}
