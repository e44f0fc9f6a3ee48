use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    ConfigMissing(Vec<String>),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Invoice source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Invoice source rate limited the request")]
    SourceRateLimited { retry_after: Option<Duration> },

    #[error("Invoice source rejected credentials: {0}")]
    SourceAuth(String),

    #[error("Invoice source rejected request with HTTP {status}: {body}")]
    SourceRejected { status: u16, body: String },

    #[error("Destination store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Destination store rate limited the request")]
    StoreRateLimited { retry_after: Option<Duration> },

    #[error("Destination store rejected credentials: {0}")]
    StoreAuth(String),

    #[error("Destination store rejected request with HTTP {status}: {body}")]
    StoreRejected { status: u16, body: String },

    #[error("Write conflict: a row for invoice {0} already exists")]
    WriteConflict(String),

    #[error("Ambiguous match: invoice {id} has {rows} destination rows")]
    AmbiguousMatch { id: String, rows: usize },

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Transient failures that a bounded retry may clear.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::SourceUnavailable(_)
                | SyncError::SourceRateLimited { .. }
                | SyncError::StoreUnavailable(_)
                | SyncError::StoreRateLimited { .. }
                | SyncError::Timeout(_)
        )
    }

    /// Failures that abort the whole run instead of a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ConfigMissing(_)
                | SyncError::ConfigInvalid(_)
                | SyncError::SourceAuth(_)
                | SyncError::StoreAuth(_)
        )
    }

    /// Server-provided wait hint, if the upstream sent one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SyncError::SourceRateLimited { retry_after } | SyncError::StoreRateLimited { retry_after } => {
                *retry_after
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
