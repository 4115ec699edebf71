//! TLS for upstream SMTP connections
//!
//! This module builds the client side used for both STARTTLS and implicit
//! TLS (port 465).
//!
//! # Trust
//! - Mozilla roots from `webpki-roots`
//! - Optional extra PEM roots (private CAs, self-signed relays)
//! - Optionally no verification at all, for relays with broken certificates

use crate::error::{AuthError, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, OwnedTrustAnchor, RootCertStore, ServerName};
use rustls_pemfile::certs;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

/// Client TLS configuration for SMTP verification
#[derive(Clone)]
pub struct TlsConfig {
    client_config: Arc<ClientConfig>,
}

impl TlsConfig {
    /// Verify servers against the bundled Mozilla roots
    pub fn new() -> Self {
        Self::with_roots(Self::default_roots())
    }

    /// Verify servers against `roots` only
    pub fn with_roots(roots: RootCertStore) -> Self {
        let config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            client_config: Arc::new(config),
        }
    }

    /// Bundled roots plus every certificate found in a PEM file
    ///
    /// # Examples
    /// ```no_run
    /// use smtpauth_rs::security::TlsConfig;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let tls_config = TlsConfig::with_ca_file("/etc/ssl/private-ca.pem")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_ca_file<P: AsRef<Path>>(ca_path: P) -> Result<Self> {
        info!("Loading extra TLS roots from {:?}", ca_path.as_ref());

        let ca_file = File::open(ca_path.as_ref())
            .map_err(|e| AuthError::Configuration(format!("Failed to open CA file: {}", e)))?;
        let mut reader = BufReader::new(ca_file);

        let ders = certs(&mut reader)
            .map_err(|e| AuthError::Configuration(format!("Failed to read CA file: {}", e)))?;

        if ders.is_empty() {
            return Err(AuthError::Configuration(
                "No certificates found in CA file".to_string(),
            ));
        }

        let mut roots = Self::default_roots();
        let (added, ignored) = roots.add_parsable_certificates(&ders);
        debug!("Loaded {} extra root(s), ignored {}", added, ignored);

        Ok(Self::with_roots(roots))
    }

    /// Accept any server certificate
    pub fn insecure() -> Self {
        warn!("Upstream SMTP certificates will not be verified");

        let mut config = ClientConfig::builder()
            .with_safe_defaults()
            .with_root_certificates(RootCertStore::empty())
            .with_no_client_auth();
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCertificate));

        Self {
            client_config: Arc::new(config),
        }
    }

    /// Build from the `[smtp]` settings
    pub fn from_settings(ca_file: Option<&str>, accept_invalid_certs: bool) -> Result<Self> {
        if accept_invalid_certs {
            return Ok(Self::insecure());
        }

        match ca_file {
            Some(path) => Self::with_ca_file(path),
            None => Ok(Self::new()),
        }
    }

    fn default_roots() -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add_trust_anchors(webpki_roots::TLS_SERVER_ROOTS.iter().map(|ta| {
            OwnedTrustAnchor::from_subject_spki_name_constraints(
                ta.subject,
                ta.spki,
                ta.name_constraints,
            )
        }));
        roots
    }

    /// Create a TLS connector
    pub fn connector(&self) -> tokio_rustls::TlsConnector {
        tokio_rustls::TlsConnector::from(self.client_config.clone())
    }

    /// Run the client handshake over `stream`, checking the certificate
    /// against `hostname`
    pub async fn connect<S>(&self, hostname: &str, stream: S) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(hostname)
            .map_err(|_| AuthError::Tls(format!("Invalid TLS server name: {}", hostname)))?;

        self.connector()
            .connect(server_name, stream)
            .await
            .map_err(|e| AuthError::Tls(format!("Handshake with {} failed: {}", hostname, e)))
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_roots_are_loaded() {
        assert!(!TlsConfig::default_roots().is_empty());
    }

    #[test]
    fn test_with_ca_file() {
        let cert = rcgen::generate_simple_self_signed(vec!["relay.local".to_string()]).unwrap();
        let mut ca_file = NamedTempFile::new().unwrap();
        ca_file
            .write_all(cert.serialize_pem().unwrap().as_bytes())
            .unwrap();

        let tls_config = TlsConfig::with_ca_file(ca_file.path()).unwrap();
        assert!(Arc::strong_count(&tls_config.client_config) >= 1);
    }

    #[test]
    fn test_empty_ca_file_is_configuration_error() {
        let ca_file = NamedTempFile::new().unwrap();
        assert!(matches!(
            TlsConfig::with_ca_file(ca_file.path()),
            Err(AuthError::Configuration(_))
        ));
        assert!(matches!(
            TlsConfig::from_settings(Some("/nonexistent/ca.pem"), false),
            Err(AuthError::Configuration(_))
        ));
    }

    #[test]
    fn test_insecure_settings_skip_ca_file() {
        assert!(TlsConfig::from_settings(Some("/nonexistent/ca.pem"), true).is_ok());
    }
}
