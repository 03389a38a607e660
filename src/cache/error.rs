use thiserror::Error;

use super::status::LookupStatus;

/// Failures surfaced by the cache contract.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache `{cache}` could not connect: {message}")]
    Connection { cache: String, message: String },
    #[error("cache configuration error: {message}")]
    Configuration { message: String },
    #[error("value for key [{key}] not in cache")]
    KeyNotFound { key: String, status: LookupStatus },
    #[error("unable to write key [{key}] to cache: {reason}")]
    Write { key: String, reason: String },
    #[error("cache `{cache}` is closed")]
    Closed { cache: String },
}

impl CacheError {
    pub fn connection(cache: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            cache: cache.into(),
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Lookup status paired with this error.
    ///
    /// Absent keys report `Miss`, keys held back by their deadline report
    /// `Expired`; every other failure reports `Error`.
    pub fn status(&self) -> LookupStatus {
        match self {
            CacheError::KeyNotFound { status, .. } => *status,
            _ => LookupStatus::Error,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::KeyNotFound { .. })
    }
}
