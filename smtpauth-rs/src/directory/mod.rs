//! Domain and alias resolution
//!
//! Finds the SMTP endpoint that verifies logins for a domain. A domain
//! matches either by its own name or through one of its active aliases;
//! the endpoint carries the owning (canonical) domain name so that callers
//! can report `user@canonical` after an alias was used.
//!
//! - [`sql`]: sqlx backed directory over the platform's tables

pub mod sql;

pub use sql::SqlDirectory;

use crate::error::{AuthError, Result};
use crate::template::LoginTemplate;
use tracing::debug;

/// Protocol tag of SMTP rows in the auth-settings table
pub const SMTP_PROTOCOL: i64 = 3;

/// The single endpoint selected for a login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub address: String,
    /// `None` means the standard SMTP port
    pub port: Option<u16>,
    pub split_address: bool,
    pub template: LoginTemplate,
    pub canonical_domain: String,
}

/// Read access to domains, aliases and auth settings
#[async_trait::async_trait]
pub trait EndpointDirectory: Send + Sync {
    /// All enabled SMTP endpoints whose active domain is named `domain` or
    /// has an active alias named `domain`, in tie-break order.
    async fn lookup(&self, domain: &str) -> Result<Vec<ResolvedEndpoint>>;

    /// First endpoint returned by [`lookup`](Self::lookup)
    async fn resolve(&self, domain: &str) -> Result<ResolvedEndpoint> {
        let mut endpoints = self.lookup(domain).await?;
        if endpoints.len() > 1 {
            debug!(
                "{} SMTP endpoints match {}, using the first",
                endpoints.len(),
                domain
            );
        }

        if endpoints.is_empty() {
            return Err(AuthError::ResolutionFailure(domain.to_string()));
        }
        Ok(endpoints.swap_remove(0))
    }
}

/// Table names the directory queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub auth_settings: String,
    pub domains: String,
    pub domain_aliases: String,
}

impl TableNames {
    /// Validate the three entity names.
    ///
    /// Names are interpolated into SQL, so only `[A-Za-z0-9_]` identifiers
    /// with an optional `schema.` prefix are accepted.
    pub fn new(
        auth_settings: impl Into<String>,
        domains: impl Into<String>,
        domain_aliases: impl Into<String>,
    ) -> Result<Self> {
        let names = Self {
            auth_settings: auth_settings.into(),
            domains: domains.into(),
            domain_aliases: domain_aliases.into(),
        };

        for (param, value) in [
            ("auth_settings_table", &names.auth_settings),
            ("domains_table", &names.domains),
            ("domain_aliases_table", &names.domain_aliases),
        ] {
            if value.is_empty() {
                return Err(AuthError::Configuration(format!(
                    "{} is required",
                    param
                )));
            }
            if !is_identifier(value) {
                return Err(AuthError::Configuration(format!(
                    "{} is not a valid table name: {}",
                    param, value
                )));
            }
        }

        Ok(names)
    }
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            auth_settings: "auth_settings".to_string(),
            domains: "domains".to_string(),
            domain_aliases: "domain_aliases".to_string(),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut segments = name.split('.');
    let valid = |s: &str| {
        !s.is_empty()
            && !s.starts_with(|c: char| c.is_ascii_digit())
            && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    match (segments.next(), segments.next(), segments.next()) {
        (Some(table), None, None) => valid(table),
        (Some(schema), Some(table), None) => valid(schema) && valid(table),
        _ => false,
    }
}
