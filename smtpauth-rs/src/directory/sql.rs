//! SQL directory over the platform's domain tables
//!
//! # Usage
//! ```no_run
//! use smtpauth_rs::directory::{EndpointDirectory, SqlDirectory, TableNames};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = SqlDirectory::connect("sqlite://smtpauth.db", TableNames::default()).await?;
//! let endpoint = directory.resolve("example.com").await?;
//! println!("{}:{:?}", endpoint.address, endpoint.port);
//! # Ok(())
//! # }
//! ```

use super::{EndpointDirectory, ResolvedEndpoint, TableNames, SMTP_PROTOCOL};
use crate::error::{AuthError, Result};
use crate::template::LoginTemplate;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

type EndpointRow = (Option<i64>, String, bool, Option<String>, String);

/// Settings for a new SMTP endpoint row
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    pub address: String,
    pub port: Option<u16>,
    pub split_address: bool,
    pub user_map_template: Option<String>,
    pub enabled: bool,
}

impl EndpointSettings {
    pub fn new(address: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            address: address.into(),
            port,
            split_address: false,
            user_map_template: None,
            enabled: true,
        }
    }
}

/// Directory backed by an sqlx pool
#[derive(Clone)]
pub struct SqlDirectory {
    pub db: Arc<SqlitePool>,
    tables: TableNames,
    lookup_sql: String,
}

impl SqlDirectory {
    /// Connect to `database_url`
    pub async fn connect(database_url: &str, tables: TableNames) -> Result<Self> {
        if database_url.trim().is_empty() {
            return Err(AuthError::Configuration("database url is required".to_string()));
        }

        let db = SqlitePool::connect(database_url).await?;
        info!("Connected endpoint directory");
        Ok(Self::new(db, tables))
    }

    /// Wrap an existing pool
    pub fn new(db: SqlitePool, tables: TableNames) -> Self {
        let lookup_sql = format!(
            r#"
            SELECT s.port, s.address, s.split_address, s.user_map_template, d.name
            FROM {auth} s
            JOIN {domains} d ON d.id = s.domain_id
            WHERE s.protocol = ?
              AND s.enabled = ?
              AND d.status = ?
              AND (
                d.name = ?
                OR EXISTS (
                    SELECT 1 FROM {aliases} a
                    WHERE a.domain_id = d.id AND a.name = ? AND a.status = ?
                )
              )
            ORDER BY s.id
            "#,
            auth = tables.auth_settings,
            domains = tables.domains,
            aliases = tables.domain_aliases,
        );

        Self {
            db: Arc::new(db),
            tables,
            lookup_sql,
        }
    }

    async fn fetch_rows(&self, domain: &str) -> Result<Vec<EndpointRow>> {
        let rows = sqlx::query_as::<_, EndpointRow>(&self.lookup_sql)
            .bind(SMTP_PROTOCOL)
            .bind(true)
            .bind(true)
            .bind(domain)
            .bind(domain)
            .bind(true)
            .fetch_all(&*self.db)
            .await?;

        debug!("{} endpoint row(s) for {}", rows.len(), domain);
        Ok(rows)
    }

    /// Create the default tables if they are missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                status BOOLEAN NOT NULL DEFAULT 1
            )
            "#,
            self.tables.domains
        ))
        .execute(&*self.db)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_id INTEGER NOT NULL REFERENCES {}(id),
                name TEXT NOT NULL UNIQUE,
                status BOOLEAN NOT NULL DEFAULT 1
            )
            "#,
            self.tables.domain_aliases, self.tables.domains
        ))
        .execute(&*self.db)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_id INTEGER NOT NULL REFERENCES {}(id),
                protocol INTEGER NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT 1,
                port INTEGER,
                address TEXT NOT NULL,
                split_address BOOLEAN NOT NULL DEFAULT 0,
                user_map_template TEXT
            )
            "#,
            self.tables.auth_settings, self.tables.domains
        ))
        .execute(&*self.db)
        .await?;

        debug!("Directory schema ready");
        Ok(())
    }

    /// Add a domain, returning its id
    pub async fn add_domain(&self, name: &str, active: bool) -> Result<i64> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (name, status) VALUES (?, ?)",
            self.tables.domains
        ))
        .bind(name)
        .bind(active)
        .execute(&*self.db)
        .await?;

        info!("Domain added: {}", name);
        Ok(result.last_insert_rowid())
    }

    /// Activate or deactivate a domain
    pub async fn set_domain_status(&self, domain_id: i64, active: bool) -> Result<()> {
        sqlx::query(&format!(
            "UPDATE {} SET status = ? WHERE id = ?",
            self.tables.domains
        ))
        .bind(active)
        .bind(domain_id)
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    /// Add an alias name for a domain
    pub async fn add_alias(&self, domain_id: i64, name: &str, active: bool) -> Result<i64> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (domain_id, name, status) VALUES (?, ?, ?)",
            self.tables.domain_aliases
        ))
        .bind(domain_id)
        .bind(name)
        .bind(active)
        .execute(&*self.db)
        .await?;

        info!("Alias {} added for domain {}", name, domain_id);
        Ok(result.last_insert_rowid())
    }

    /// Attach an SMTP auth endpoint to a domain
    pub async fn add_smtp_endpoint(&self, domain_id: i64, settings: &EndpointSettings) -> Result<i64> {
        let result = sqlx::query(&format!(
            r#"
            INSERT INTO {} (domain_id, protocol, enabled, port, address, split_address, user_map_template)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            self.tables.auth_settings
        ))
        .bind(domain_id)
        .bind(SMTP_PROTOCOL)
        .bind(settings.enabled)
        .bind(settings.port.map(i64::from))
        .bind(&settings.address)
        .bind(settings.split_address)
        .bind(&settings.user_map_template)
        .execute(&*self.db)
        .await?;

        info!(
            "SMTP endpoint {} added for domain {}",
            settings.address, domain_id
        );
        Ok(result.last_insert_rowid())
    }
}

#[async_trait::async_trait]
impl EndpointDirectory for SqlDirectory {
    /// Matching endpoints; rows with unusable data are logged and skipped
    async fn lookup(&self, domain: &str) -> Result<Vec<ResolvedEndpoint>> {
        let rows = self.fetch_rows(domain).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match into_endpoint(row) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    warn!("Skipping SMTP endpoint for {}: {}", domain, e);
                    None
                }
            })
            .collect())
    }

    /// Decode only the lowest-id row, so a broken sibling row cannot deny
    /// logins served by a valid one
    async fn resolve(&self, domain: &str) -> Result<ResolvedEndpoint> {
        let rows = self.fetch_rows(domain).await?;
        if rows.len() > 1 {
            debug!("{} SMTP endpoints match {}, using the first", rows.len(), domain);
        }

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::ResolutionFailure(domain.to_string()))?;
        into_endpoint(row)
    }
}

fn into_endpoint(row: EndpointRow) -> Result<ResolvedEndpoint> {
    let (port, address, split_address, template, canonical_domain) = row;

    let port = match port {
        None | Some(0) => None,
        Some(port) => Some(
            u16::try_from(port)
                .map_err(|_| AuthError::Decode(format!("invalid port {} for {}", port, address)))?,
        ),
    };

    if address.trim().is_empty() {
        return Err(AuthError::Decode(format!(
            "empty SMTP address for {}",
            canonical_domain
        )));
    }

    Ok(ResolvedEndpoint {
        address,
        port,
        split_address,
        template: LoginTemplate::from(template),
        canonical_domain,
    })
}
