//! CLI for the SMTP login authenticator
//!
//! # Usage
//!
//! ```bash
//! # Create the domain tables in a development database
//! smtpauth --config smtpauth.toml init-schema
//!
//! # Show which SMTP server verifies a domain
//! smtpauth resolve alias.co
//!
//! # Check a login (password from SMTPAUTH_PASSWORD or stdin)
//! SMTPAUTH_PASSWORD=secret smtpauth check jane@alias.co
//! ```

use clap::{Parser, Subcommand};
use smtpauth_rs::config::{Config, LoggingConfig};
use smtpauth_rs::directory::{EndpointDirectory, SqlDirectory, TableNames};
use smtpauth_rs::{AuthContext, AuthOutcome, Identity, IdentityAuthenticator, SmtpAuthenticator};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "smtpauth")]
#[command(about = "Verify mail logins against upstream SMTP servers", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "smtpauth.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Authenticate a login
    Check {
        /// Login as typed by the user (user@domain)
        login: String,
        /// Remote address the attempt comes from
        #[arg(long)]
        remote_addr: Option<IpAddr>,
    },
    /// Show the SMTP endpoint a domain resolves to
    Resolve {
        /// Domain or alias name
        domain: String,
    },
    /// Create the default directory tables
    InitSchema,
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Ok(Config::from_file(path)?)
    } else {
        Ok(Config::default())
    }
}

async fn open_directory(config: &Config) -> anyhow::Result<SqlDirectory> {
    config.validate()?;
    let tables = TableNames::new(
        config.database.auth_settings_table.clone(),
        config.database.domains_table.clone(),
        config.database.domain_aliases_table.clone(),
    )?;
    Ok(SqlDirectory::connect(&config.database.url, tables).await?)
}

fn read_password() -> anyhow::Result<String> {
    if let Ok(password) = std::env::var("SMTPAUTH_PASSWORD") {
        return Ok(password);
    }

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config.logging);

    info!("smtpauth v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Check { login, remote_addr } => {
            let authenticator = SmtpAuthenticator::from_config(&config).await?;
            let identity = Identity::new(login, read_password()?);
            let context = AuthContext { remote_addr };

            match authenticator.authenticate(&identity, &context).await {
                AuthOutcome::Accepted(canonical) => println!("accepted {}", canonical),
                AuthOutcome::Denied => {
                    println!("denied");
                    std::process::exit(1);
                }
            }
        }
        Commands::Resolve { domain } => {
            let directory = open_directory(&config).await?;
            match directory.resolve(&domain).await {
                Ok(endpoint) => println!(
                    "{} -> {}:{} (canonical {}, split_address {}, template {:?})",
                    domain,
                    endpoint.address,
                    endpoint
                        .port
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "default".to_string()),
                    endpoint.canonical_domain,
                    endpoint.split_address,
                    endpoint.template.as_str()
                ),
                Err(_) => {
                    println!("{}: not found", domain);
                    std::process::exit(1);
                }
            }
        }
        Commands::InitSchema => {
            let directory = open_directory(&config).await?;
            directory.ensure_schema().await?;
            println!("schema ready");
        }
    }

    Ok(())
}
