//! Error types for the reply pipeline.

use thiserror::Error;

/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors that can occur while retrieving exemplars or generating replies.
#[derive(Error, Debug)]
pub enum RetrievalError {
    /// Embedding, cache or similarity error.
    #[error("embedding error: {0}")]
    Embedding(#[from] replygen_embeddings::EmbeddingError),

    /// Completion provider failed (network, auth or bad payload).
    #[error("completion error: {0}")]
    Completion(String),

    /// Completion provider kept answering 429 after the allowed retries.
    #[error("completion rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Completion provider did not answer in time.
    #[error("completion request timed out")]
    CompletionTimeout,

    /// Request rejected before touching any provider.
    #[error("validation error: {0}")]
    Validation(String),

    /// Dataset could not be used.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// CSV parsing error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetrievalError {
    /// Whether a remote provider (embedding or completion) caused this error.
    pub fn is_provider_error(&self) -> bool {
        match self {
            Self::Embedding(e) => e.is_provider_error(),
            Self::Completion(_)
            | Self::RateLimited { .. }
            | Self::CompletionTimeout
            | Self::Http(_) => true,
            _ => false,
        }
    }

    /// Whether the caller sent an unusable request.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
