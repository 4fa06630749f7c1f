//! Error taxonomy for the fetch engine.
//!
//! Only [`ArchiveError::Config`] is meant to be fatal to a whole run. Every
//! other variant is scoped: API and network failures end one cursor,
//! persistence failures are retried at the next checkpoint.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("API error {status}: {body}")]
    PermanentApi { status: u16, body: String },

    #[error("rate limit budget exceeded after waiting {waited:?}")]
    RateLimitBudgetExceeded { waited: Duration },

    #[error("failed to persist archive {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid time frame: {0}")]
    InvalidTimeFrame(String),
}

impl ArchiveError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ArchiveError::RateLimited { .. } | ArchiveError::TransientNetwork(_)
        )
    }
}

impl From<reqwest::Error> for ArchiveError {
    fn from(err: reqwest::Error) -> Self {
        // A request that cannot be built will not build on retry either.
        if err.is_builder() {
            return ArchiveError::Config(format!("invalid request: {}", err));
        }
        ArchiveError::TransientNetwork(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
