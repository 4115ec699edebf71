//! Credential verification against an upstream SMTP server
//!
//! # Connection policy
//! - port 465: implicit TLS from the first byte, never STARTTLS
//! - port 25 or unset: plaintext on 25, upgraded when STARTTLS is offered
//! - any other port: plaintext on that port, upgraded when STARTTLS is offered
//!
//! Advertised AUTH mechanisms are tried in the order CRAM-MD5, PLAIN, LOGIN
//! until one is accepted.
//!
//! Whatever happens once a session is open, it is ended with QUIT. Errors
//! while quitting are logged and dropped; the outcome is already known.

use crate::config::SmtpConfig;
use crate::error::{AuthError, Result};
use crate::security::{AuthMechanism, TlsConfig};
use crate::smtp::client::SmtpClient;
use crate::smtp::response::Capabilities;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Standard SMTP port
pub const SMTP_PORT: u16 = 25;
/// SMTP over implicit TLS
pub const SMTPS_PORT: u16 = 465;
/// Default budget for each network step
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport security at connect time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// Plaintext, upgraded with STARTTLS when the server offers it
    Opportunistic,
    /// TLS before the greeting
    ImplicitTls,
}

/// Port and transport security for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionPolicy {
    pub port: u16,
    pub security: Security,
}

impl ConnectionPolicy {
    pub fn for_port(port: Option<u16>) -> Self {
        match port {
            Some(SMTPS_PORT) => Self {
                port: SMTPS_PORT,
                security: Security::ImplicitTls,
            },
            None | Some(SMTP_PORT) => Self {
                port: SMTP_PORT,
                security: Security::Opportunistic,
            },
            Some(port) => Self {
                port,
                security: Security::Opportunistic,
            },
        }
    }
}

/// Checks a login and password against an SMTP server
#[async_trait::async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// `true` when the server accepted the credentials
    async fn verify(&self, address: &str, port: Option<u16>, login: &str, password: &str) -> bool;
}

/// Verifier speaking SMTP over the network
///
/// # Examples
/// ```no_run
/// use smtpauth_rs::security::TlsConfig;
/// use smtpauth_rs::smtp::{CredentialVerifier, SmtpVerifier};
///
/// # async fn example() {
/// let verifier = SmtpVerifier::new(TlsConfig::new());
/// let accepted = verifier
///     .verify("mail.example.com", Some(587), "bob@example.com", "secret")
///     .await;
/// # }
/// ```
#[derive(Clone)]
pub struct SmtpVerifier {
    tls: TlsConfig,
    timeout: Duration,
    helo_name: String,
}

impl SmtpVerifier {
    pub fn new(tls: TlsConfig) -> Self {
        Self {
            tls,
            timeout: DEFAULT_TIMEOUT,
            helo_name: local_hostname(),
        }
    }

    /// Build from the `[smtp]` settings
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let tls = TlsConfig::from_settings(config.tls_ca_file.as_deref(), config.accept_invalid_certs)?;
        let mut verifier = Self::new(tls).with_timeout(config.timeout());
        if let Some(helo_name) = &config.helo_name {
            verifier = verifier.with_helo_name(helo_name.clone());
        }
        Ok(verifier)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_helo_name(mut self, helo_name: impl Into<String>) -> Self {
        self.helo_name = helo_name.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the login handshake, reporting why it failed
    pub async fn verify_with(
        &self,
        address: &str,
        policy: ConnectionPolicy,
        login: &str,
        password: &str,
    ) -> Result<()> {
        let client = SmtpClient::connect(address, policy.port, self.timeout).await?;

        match policy.security {
            Security::ImplicitTls => {
                let mut client = client.into_tls(&self.tls, address).await?;
                let outcome = self.greet_and_login(&mut client, login, password).await;
                finish(client, outcome).await
            }
            Security::Opportunistic => self.opportunistic(client, address, login, password).await,
        }
    }

    async fn opportunistic(
        &self,
        mut client: SmtpClient<tokio::net::TcpStream>,
        address: &str,
        login: &str,
        password: &str,
    ) -> Result<()> {
        let capabilities = match self.greet(&mut client).await {
            Ok(capabilities) => capabilities,
            Err(e) => return finish(client, Err(e)).await,
        };

        if !capabilities.has_starttls() {
            let outcome = self.login(&mut client, &capabilities, login, password).await;
            return finish(client, outcome).await;
        }

        debug!("Upgrading connection to {} with STARTTLS", address);
        if let Err(e) = client.starttls().await {
            return finish(client, Err(e)).await;
        }

        // A failed handshake leaves no session to quit; dropping the
        // client closes the socket.
        let mut client = client.into_tls(&self.tls, address).await?;
        let outcome = match client.ehlo(&self.helo_name).await {
            Ok(capabilities) => self.login(&mut client, &capabilities, login, password).await,
            Err(e) => Err(e),
        };
        finish(client, outcome).await
    }

    async fn greet<S>(&self, client: &mut SmtpClient<S>) -> Result<Capabilities>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        client.read_greeting().await?;
        client.ehlo(&self.helo_name).await
    }

    async fn greet_and_login<S>(&self, client: &mut SmtpClient<S>, login: &str, password: &str) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let capabilities = self.greet(client).await?;
        self.login(client, &capabilities, login, password).await
    }

    async fn login<S>(
        &self,
        client: &mut SmtpClient<S>,
        capabilities: &Capabilities,
        login: &str,
        password: &str,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mechanisms = AuthMechanism::negotiate(capabilities.auth_mechanisms());
        let mut outcome = Err(AuthError::ProtocolRejection(format!(
            "No supported AUTH mechanism in {:?}",
            capabilities.auth_mechanisms()
        )));

        // A refused mechanism moves on to the next one; anything else ends
        // the attempt.
        for mechanism in mechanisms {
            outcome = client.authenticate(mechanism, login, password).await;
            match &outcome {
                Err(AuthError::ProtocolRejection(reason)) => {
                    debug!("{} refused: {}", mechanism.as_str(), reason);
                }
                _ => break,
            }
        }

        outcome
    }
}

#[async_trait::async_trait]
impl CredentialVerifier for SmtpVerifier {
    async fn verify(&self, address: &str, port: Option<u16>, login: &str, password: &str) -> bool {
        let policy = ConnectionPolicy::for_port(port);

        match self.verify_with(address, policy, login, password).await {
            Ok(()) => {
                info!("{} accepted by {}:{}", login, address, policy.port);
                true
            }
            Err(e) => {
                info!("{} not verified by {}:{}: {}", login, address, policy.port, e);
                false
            }
        }
    }
}

/// QUIT, then hand back the session outcome
async fn finish<S>(mut client: SmtpClient<S>, outcome: Result<()>) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = client.quit().await {
        debug!("Ignoring error while closing SMTP session: {}", e);
    }
    outcome
}

fn local_hostname() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().to_string();
    if hostname.is_empty() {
        "localhost".to_string()
    } else {
        hostname
    }
}
