//! TOML configuration for the authenticator and the `smtpauth` binary

use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the domain, alias and auth-settings records live
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (e.g. `sqlite://smtpauth.db`)
    pub url: String,
    pub auth_settings_table: String,
    pub domains_table: String,
    pub domain_aliases_table: String,
}

/// Upstream SMTP verification settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    /// Budget for connect, TLS handshake and each command round trip
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Name announced in EHLO; the local hostname when unset
    pub helo_name: Option<String>,
    /// Extra PEM trust roots for upstream servers
    pub tls_ca_file: Option<String>,
    /// Skip certificate verification for STARTTLS and port 465.
    ///
    /// Off by default: logins on upstreams with self-signed or internal-CA
    /// certificates are denied until that CA is listed in `tls_ca_file` or
    /// this is turned on.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockoutConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
    #[serde(default = "default_window")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_max_failures() -> usize {
    5
}

fn default_window() -> u64 {
    3600
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "pretty".to_string()
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            helo_name: None,
            tls_ca_file: None,
            accept_invalid_certs: false,
        }
    }
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failures: default_max_failures(),
            window_secs: default_window(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl SmtpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LockoutConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Configuration(e.to_string()))?;

        toml::from_str(&content).map_err(|e| AuthError::Configuration(e.to_string()))
    }

    pub fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://smtpauth.db?mode=rwc".to_string(),
                auth_settings_table: "auth_settings".to_string(),
                domains_table: "domains".to_string(),
                domain_aliases_table: "domain_aliases".to_string(),
            },
            smtp: SmtpConfig::default(),
            lockout: LockoutConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Fail fast when one of the four collaborator parameters is missing
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("database.url", &self.database.url),
            ("database.auth_settings_table", &self.database.auth_settings_table),
            ("database.domains_table", &self.database.domains_table),
            ("database.domain_aliases_table", &self.database.domain_aliases_table),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::Configuration(format!(
                    "{} is required and must not be empty",
                    name
                )));
            }
        }

        if self.smtp.timeout_secs == 0 {
            return Err(AuthError::Configuration(
                "smtp.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
