//! SMTP client connection used for credential checks
//!
//! Speaks just enough of RFC 5321 to log in: greeting, EHLO, STARTTLS,
//! AUTH and QUIT. Every round trip is bounded by the connection timeout.

use crate::error::{AuthError, Result};
use crate::security::auth::{self, AuthMechanism};
use crate::security::TlsConfig;
use crate::smtp::response::{Capabilities, Reply, ReplyLine, MAX_LINE_LENGTH};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::{debug, warn};

/// Run `future`, failing with [`AuthError::Timeout`] once `timeout` elapses
pub async fn within<T, F>(timeout: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| AuthError::Timeout(timeout))?
}

/// An open connection to an SMTP server
pub struct SmtpClient<S> {
    stream: BufReader<S>,
    timeout: Duration,
}

impl SmtpClient<TcpStream> {
    /// Open a plaintext TCP connection
    pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        debug!("Connecting to {}:{}", host, port);
        let stream = within(timeout, async {
            TcpStream::connect((host, port)).await.map_err(AuthError::from)
        })
        .await?;

        Ok(Self::new(stream, timeout))
    }
}

impl<S> SmtpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout,
        }
    }

    /// Wrap the connection in TLS. Used right after connecting for implicit
    /// TLS, or after a `220` reply to STARTTLS.
    pub async fn into_tls(self, tls: &TlsConfig, hostname: &str) -> Result<SmtpClient<TlsStream<S>>> {
        if !self.stream.buffer().is_empty() {
            return Err(AuthError::ProtocolRejection(
                "Server sent data ahead of the TLS handshake".to_string(),
            ));
        }

        let timeout = self.timeout;
        let stream = within(timeout, tls.connect(hostname, self.stream.into_inner())).await?;
        debug!("TLS established with {}", hostname);

        Ok(SmtpClient::new(stream, timeout))
    }

    /// Read the `220` service greeting
    pub async fn read_greeting(&mut self) -> Result<Reply> {
        let timeout = self.timeout;
        within(timeout, self.read_reply()).await?.expect(220)
    }

    /// Send EHLO and collect the advertised extensions
    pub async fn ehlo(&mut self, helo_name: &str) -> Result<Capabilities> {
        let reply = self.command(&format!("EHLO {}", helo_name)).await?.expect(250)?;
        Ok(Capabilities::from_ehlo(&reply))
    }

    /// Ask for a TLS upgrade; the caller performs the handshake with
    /// [`into_tls`](Self::into_tls)
    pub async fn starttls(&mut self) -> Result<()> {
        self.command("STARTTLS").await?.expect(220)?;
        Ok(())
    }

    /// Log in with `mechanism`. Only `235` counts as success; in particular
    /// `503` (already authenticated, or bad sequence) is a rejection.
    pub async fn authenticate(
        &mut self,
        mechanism: AuthMechanism,
        username: &str,
        password: &str,
    ) -> Result<()> {
        debug!("Authenticating {} using {}", username, mechanism.as_str());

        let reply = match mechanism {
            AuthMechanism::CramMd5 => {
                let challenge = self.command("AUTH CRAM-MD5").await?.expect(334)?;
                let Some(response) =
                    auth::encode_cram_md5(username, password, &challenge.message())
                else {
                    // Cancel the exchange so the next mechanism starts clean
                    self.command("*").await?;
                    return Err(AuthError::ProtocolRejection(format!(
                        "Invalid CRAM-MD5 challenge: {}",
                        challenge
                    )));
                };
                self.secret_command(&response, "[cram-md5 response]").await?
            }
            AuthMechanism::Plain => {
                self.secret_command(
                    &format!("AUTH PLAIN {}", auth::encode_plain(username, password)),
                    "AUTH PLAIN [credentials]",
                )
                .await?
            }
            AuthMechanism::Login => {
                self.command("AUTH LOGIN").await?.expect(334)?;
                self.secret_command(&auth::encode_login_credential(username), "[username]")
                    .await?
                    .expect(334)?;
                self.secret_command(&auth::encode_login_credential(password), "[password]")
                    .await?
            }
        };

        if reply.code == 235 {
            Ok(())
        } else {
            warn!("Upstream rejected login for {}: {}", username, reply);
            Err(AuthError::ProtocolRejection(format!(
                "Authentication failed: {}",
                reply
            )))
        }
    }

    /// End the session
    pub async fn quit(&mut self) -> Result<()> {
        self.command("QUIT").await?;
        Ok(())
    }

    /// Send one command and read its reply
    pub async fn command(&mut self, line: &str) -> Result<Reply> {
        debug!("> {}", line);
        self.round_trip(line).await
    }

    async fn secret_command(&mut self, line: &str, redacted: &str) -> Result<Reply> {
        debug!("> {}", redacted);
        self.round_trip(line).await
    }

    async fn round_trip(&mut self, line: &str) -> Result<Reply> {
        let timeout = self.timeout;
        within(timeout, async {
            self.write_line(line).await?;
            self.read_reply().await
        })
        .await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let writer = self.stream.get_mut();
        writer.write_all(format!("{}\r\n", line).as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut reply = Reply::empty();

        loop {
            let line = self.read_line().await?;
            debug!("< {}", line.trim_end());

            if reply.push(ReplyLine::parse(&line)?)? {
                return Ok(reply);
            }
        }
    }

    async fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        // One byte past the limit so overlong lines fail to parse
        let limit = (MAX_LINE_LENGTH + 3) as u64;
        let read = (&mut self.stream).take(limit).read_line(&mut line).await?;

        if read == 0 {
            return Err(AuthError::Transport(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )));
        }
        Ok(line)
    }
}
