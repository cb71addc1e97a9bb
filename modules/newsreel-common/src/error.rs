use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NewsreelError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Optimistic concurrency conflict on {collection}/{id}")]
    Conflict { collection: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Poison message after {attempts} attempts: {reason}")]
    PoisonMessage { attempts: u32, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl NewsreelError {
    /// Whether a retry with back-off can reasonably succeed.
    /// Conflict is retryable through the etag read-modify-write loop;
    /// Validation and PoisonMessage never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NewsreelError::TransientNetwork(_)
                | NewsreelError::RateLimited { .. }
                | NewsreelError::Conflict { .. }
        )
    }

    pub fn conflict(collection: &str, id: &str) -> Self {
        NewsreelError::Conflict {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        NewsreelError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}
