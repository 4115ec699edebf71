use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Malformed identity: {0}")]
    MalformedIdentity(String),

    #[error("Login is rate limited")]
    RateLimited,

    #[error("No enabled SMTP endpoint for domain {0}")]
    ResolutionFailure(String),

    #[error("IO error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("SMTP protocol error: {0}")]
    ProtocolRejection(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;
