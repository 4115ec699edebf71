//! Login authentication through the upstream SMTP server
//!
//! [`SmtpAuthenticator`] ties the pieces together for one attempt:
//!
//! 1. refuse locked-out logins
//! 2. split `user@domain`
//! 3. resolve the domain (directly or through an alias) to its SMTP endpoint
//! 4. build the SMTP login (split address, canonical domain, template)
//! 5. log in upstream
//! 6. report the outcome to the lockout
//!
//! Every failure ends in [`AuthOutcome::Denied`] without a reason, so callers
//! cannot tell an unknown domain from a wrong password. Reasons are logged.
//!
//! # Example
//! ```no_run
//! use smtpauth_rs::authenticator::{IdentityAuthenticator, SmtpAuthenticator};
//! use smtpauth_rs::identity::{AuthContext, Identity};
//! use smtpauth_rs::Config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let authenticator = SmtpAuthenticator::from_config(&Config::default()).await?;
//!
//! let identity = Identity::new("bob@example.com", "secret");
//! let outcome = authenticator
//!     .authenticate(&identity, &AuthContext::default())
//!     .await;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::directory::{EndpointDirectory, ResolvedEndpoint, SqlDirectory, TableNames};
use crate::error::{AuthError, Result};
use crate::identity::{AuthContext, Identity, LoginParts};
use crate::security::{FailedLoginTracker, LoginLockout, NoLockout};
use crate::smtp::{CredentialVerifier, SmtpVerifier};
use crate::template;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of an authentication attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Verified; carries the canonical `user@domain`
    Accepted(String),
    Denied,
}

impl AuthOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    pub fn identity(&self) -> Option<&str> {
        match self {
            Self::Accepted(identity) => Some(identity),
            Self::Denied => None,
        }
    }
}

/// Inbound contract of the identity provider
#[async_trait::async_trait]
pub trait IdentityAuthenticator: Send + Sync {
    /// Short name the provider registers this authenticator under
    fn name(&self) -> &'static str;

    async fn authenticate(&self, identity: &Identity, context: &AuthContext) -> AuthOutcome;
}

/// Logins derived for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPlan {
    /// Reported to the caller on success
    pub identity: String,
    /// Sent to the SMTP server
    pub smtp_login: String,
}

impl LoginPlan {
    /// Apply split-address, canonical-domain and template rules.
    ///
    /// A non-empty template overrides whatever the other two rules produced.
    pub fn build(login: &str, parts: LoginParts<'_>, endpoint: &ResolvedEndpoint) -> Self {
        let mut identity = login.to_string();
        let mut smtp_login = if endpoint.split_address {
            parts.username.to_string()
        } else {
            login.to_string()
        };

        if parts.domain != endpoint.canonical_domain {
            identity = parts.with_domain(&endpoint.canonical_domain);
            if !endpoint.split_address {
                smtp_login = identity.clone();
            }
        }

        let smtp_login = template::rewrite(
            parts.username,
            parts.domain,
            &endpoint.template,
            &smtp_login,
        );

        Self {
            identity,
            smtp_login,
        }
    }
}

/// Authenticates logins against the SMTP server configured for their domain
#[derive(Clone)]
pub struct SmtpAuthenticator {
    directory: Arc<dyn EndpointDirectory>,
    verifier: Arc<dyn CredentialVerifier>,
    lockout: Arc<dyn LoginLockout>,
}

impl SmtpAuthenticator {
    pub fn new(
        directory: Arc<dyn EndpointDirectory>,
        verifier: Arc<dyn CredentialVerifier>,
        lockout: Arc<dyn LoginLockout>,
    ) -> Self {
        Self {
            directory,
            verifier,
            lockout,
        }
    }

    /// Build the authenticator and its collaborators from configuration.
    ///
    /// Fails with [`AuthError::Configuration`] when the database URL or one
    /// of the three table names is missing.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let tables = TableNames::new(
            config.database.auth_settings_table.clone(),
            config.database.domains_table.clone(),
            config.database.domain_aliases_table.clone(),
        )?;
        let verifier = SmtpVerifier::from_config(&config.smtp)?;
        let directory = SqlDirectory::connect(&config.database.url, tables).await?;

        let lockout: Arc<dyn LoginLockout> = if config.lockout.enabled {
            Arc::new(FailedLoginTracker::new(
                config.lockout.max_failures,
                config.lockout.window(),
            ))
        } else {
            Arc::new(NoLockout)
        };

        info!("SMTP authenticator ready");
        Ok(Self::new(Arc::new(directory), Arc::new(verifier), lockout))
    }

    async fn try_authenticate(&self, identity: &Identity, context: &AuthContext) -> Result<String> {
        if self.lockout.is_locked(&identity.login, context).await {
            return Err(AuthError::RateLimited);
        }

        let parts = identity.parse()?;
        let endpoint = self.directory.resolve(parts.domain).await?;
        let plan = LoginPlan::build(&identity.login, parts, &endpoint);
        debug!(
            "Verifying {} as {} via {}",
            identity.login, plan.smtp_login, endpoint.address
        );

        let accepted = self
            .verifier
            .verify(
                &endpoint.address,
                endpoint.port,
                &plan.smtp_login,
                &identity.password,
            )
            .await;

        if accepted {
            Ok(plan.identity)
        } else {
            Err(AuthError::ProtocolRejection(
                "credentials not accepted upstream".to_string(),
            ))
        }
    }
}

#[async_trait::async_trait]
impl IdentityAuthenticator for SmtpAuthenticator {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn authenticate(&self, identity: &Identity, context: &AuthContext) -> AuthOutcome {
        match self.try_authenticate(identity, context).await {
            Ok(canonical) => {
                info!("Authenticated {} as {}", identity.login, canonical);
                self.lockout.record_success(&identity.login, context).await;
                AuthOutcome::Accepted(canonical)
            }
            Err(AuthError::RateLimited) => {
                info!("Denied {}: too many failed logins", identity.login);
                AuthOutcome::Denied
            }
            Err(e) => {
                info!("Denied {}: {}", identity.login, e);
                self.lockout.record_failure(&identity.login, context).await;
                AuthOutcome::Denied
            }
        }
    }
}
