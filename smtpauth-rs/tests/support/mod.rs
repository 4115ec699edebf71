//! Scripted SMTP server for integration tests

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use md5::Md5;
use rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig};
use smtpauth_rs::directory::{SqlDirectory, TableNames};
use smtpauth_rs::security::TlsConfig;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Self-signed `localhost` certificate
pub struct TestCert {
    pub der: Vec<u8>,
    pub key: Vec<u8>,
}

impl TestCert {
    pub fn generate() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        Self {
            der: cert.serialize_der().unwrap(),
            key: cert.serialize_private_key_der(),
        }
    }

    /// Client TLS settings trusting only this certificate
    pub fn client_tls(&self) -> TlsConfig {
        let mut roots = RootCertStore::empty();
        roots.add(&Certificate(self.der.clone())).unwrap();
        TlsConfig::with_roots(roots)
    }

    fn acceptor(&self) -> TlsAcceptor {
        let config = ServerConfig::builder()
            .with_safe_defaults()
            .with_no_client_auth()
            .with_single_cert(vec![Certificate(self.der.clone())], PrivateKey(self.key.clone()))
            .unwrap();
        TlsAcceptor::from(Arc::new(config))
    }
}

/// How the scripted server behaves
#[derive(Clone)]
pub struct ServerOptions {
    pub starttls: bool,
    pub implicit_tls: bool,
    /// Value of the AUTH capability, e.g. `PLAIN LOGIN`
    pub mechanisms: String,
    pub greeting_code: u16,
    /// Never send anything
    pub silent: bool,
    /// Hang up on QUIT without replying
    pub drop_on_quit: bool,
    /// Mechanism that always answers 535, e.g. `CRAM-MD5`
    pub refused_mechanism: Option<String>,
    pub username: String,
    pub password: String,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            starttls: false,
            implicit_tls: false,
            mechanisms: "PLAIN LOGIN".to_string(),
            greeting_code: 220,
            silent: false,
            drop_on_quit: false,
            refused_mechanism: None,
            username: "bob@example.com".to_string(),
            password: "secret".to_string(),
        }
    }
}

/// What one client session did
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    pub commands: Vec<String>,
    pub tls: bool,
    pub logins: Vec<String>,
    pub quit: bool,
}

impl SessionLog {
    pub fn count(&self, verb: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| c.to_uppercase().starts_with(verb))
            .count()
    }
}

pub struct MockSmtpServer {
    pub port: u16,
    sessions: Arc<Mutex<Vec<SessionLog>>>,
}

impl MockSmtpServer {
    pub async fn start(options: ServerOptions, cert: &TestCert) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let acceptor = cert.acceptor();

        let shared = sessions.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let options = options.clone();
                let acceptor = acceptor.clone();
                let sessions = shared.clone();

                tokio::spawn(async move {
                    let mut log = SessionLog::default();
                    handle(stream, &options, &acceptor, &mut log).await;
                    sessions.lock().unwrap().push(log);
                });
            }
        });

        Self { port, sessions }
    }

    /// Sessions finished so far
    pub fn sessions(&self) -> Vec<SessionLog> {
        self.sessions.lock().unwrap().clone()
    }

    /// Wait for `count` sessions to finish
    pub async fn wait_for_sessions(&self, count: usize) -> Vec<SessionLog> {
        for _ in 0..100 {
            let sessions = self.sessions();
            if sessions.len() >= count {
                return sessions;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        self.sessions()
    }
}

async fn handle(
    stream: tokio::net::TcpStream,
    options: &ServerOptions,
    acceptor: &TlsAcceptor,
    log: &mut SessionLog,
) {
    if options.silent {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        return;
    }

    if options.implicit_tls {
        let Ok(tls) = acceptor.accept(stream).await else {
            return;
        };
        log.tls = true;
        serve(tls, options, log, true).await;
        return;
    }

    if let Some(stream) = serve(stream, options, log, true).await {
        let Ok(tls) = acceptor.accept(stream).await else {
            return;
        };
        log.tls = true;
        serve(tls, options, log, false).await;
    }
}

/// Run a session; returns the stream when the client asked for STARTTLS
async fn serve<S>(stream: S, options: &ServerOptions, log: &mut SessionLog, greet: bool) -> Option<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);

    if greet {
        let greeting = format!("{} localhost mock ESMTP\r\n", options.greeting_code);
        reader.get_mut().write_all(greeting.as_bytes()).await.ok()?;
        if options.greeting_code != 220 {
            return None;
        }
    }

    loop {
        let line = read_line(&mut reader).await?;
        log.commands.push(line.clone());
        let upper = line.to_uppercase();

        let reply = if upper.starts_with("EHLO") {
            let mut reply = String::from("250-localhost\r\n");
            if options.starttls && !log.tls {
                reply.push_str("250-STARTTLS\r\n");
            }
            reply.push_str(&format!("250-AUTH {}\r\n", options.mechanisms));
            reply.push_str("250 8BITMIME\r\n");
            reply
        } else if upper == "STARTTLS" && options.starttls && !log.tls {
            reader.get_mut().write_all(b"220 2.0.0 Ready to start TLS\r\n").await.ok()?;
            return Some(reader.into_inner());
        } else if upper.starts_with("AUTH ") && refused(options, &upper) {
            "535 5.7.8 Mechanism disabled\r\n".to_string()
        } else if upper == "AUTH CRAM-MD5" {
            let challenge = "<4711.1234567890@localhost>";
            let prompt = format!("334 {}\r\n", BASE64.encode(challenge));
            reader.get_mut().write_all(prompt.as_bytes()).await.ok()?;
            let decoded = decode(&read_line(&mut reader).await?);
            let (username, digest) = decoded.rsplit_once(' ').unwrap_or_default();
            let expected = cram_md5_digest(&options.password, challenge);

            let accepted = username == options.username && digest == expected;
            log.logins.push(username.to_string());
            if accepted {
                "235 2.7.0 Authentication successful\r\n".to_string()
            } else {
                "535 5.7.8 Authentication credentials invalid\r\n".to_string()
            }
        } else if let Some(payload) = line.strip_prefix("AUTH PLAIN ") {
            let decoded = decode(payload);
            let mut parts = decoded.split('\0').skip(1);
            let username = parts.next().unwrap_or_default().to_string();
            let password = parts.next().unwrap_or_default().to_string();
            auth_reply(options, log, username, &password)
        } else if upper == "AUTH LOGIN" {
            reader.get_mut().write_all(b"334 VXNlcm5hbWU6\r\n").await.ok()?;
            let username = decode(&read_line(&mut reader).await?);
            reader.get_mut().write_all(b"334 UGFzc3dvcmQ6\r\n").await.ok()?;
            let password = decode(&read_line(&mut reader).await?);
            auth_reply(options, log, username, &password)
        } else if upper == "QUIT" {
            log.quit = true;
            if !options.drop_on_quit {
                let _ = reader.get_mut().write_all(b"221 2.0.0 Bye\r\n").await;
            }
            return None;
        } else {
            "502 5.5.2 Command not recognized\r\n".to_string()
        };

        reader.get_mut().write_all(reply.as_bytes()).await.ok()?;
    }
}

fn auth_reply(options: &ServerOptions, log: &mut SessionLog, username: String, password: &str) -> String {
    let accepted = username == options.username && password == options.password;
    log.logins.push(username);

    if accepted {
        "235 2.7.0 Authentication successful\r\n".to_string()
    } else {
        "535 5.7.8 Authentication credentials invalid\r\n".to_string()
    }
}

fn refused(options: &ServerOptions, command: &str) -> bool {
    options
        .refused_mechanism
        .as_ref()
        .is_some_and(|mechanism| command.split_whitespace().nth(1) == Some(mechanism.as_str()))
}

fn cram_md5_digest(password: &str, challenge: &str) -> String {
    let mut mac = Hmac::<Md5>::new_from_slice(password.as_bytes()).unwrap();
    mac.update(challenge.as_bytes());
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

async fn read_line<S>(reader: &mut BufReader<S>) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end().to_string()),
    }
}

fn decode(payload: &str) -> String {
    BASE64
        .decode(payload.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Empty in-memory directory with the default schema
pub async fn memory_directory() -> SqlDirectory {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let directory = SqlDirectory::new(pool, TableNames::default());
    directory.ensure_schema().await.unwrap();
    directory
}
