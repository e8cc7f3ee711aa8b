use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Document already exists: {0}")]
    Conflict(String),

    #[error("Store request throttled")]
    Throttled,

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store request timed out")]
    Timeout,

    #[error("Store connection error: {0}")]
    Connection(String),

    #[error("Store rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Partition key mismatch: {0}")]
    PartitionKeyMismatch(String),

    #[error("Store returned {status}: {message}")]
    Service { status: u16, message: String },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Failures a caller could reasonably retry later.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Error::Throttled | Error::Unavailable(_) | Error::Timeout | Error::Connection(_) => {
                true
            }
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
