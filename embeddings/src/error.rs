//! Error types for the embeddings system.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// API request failed.
    #[error("API request failed: {0}")]
    ApiRequest(String),

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Provider did not answer within the configured timeout.
    #[error("provider request timed out")]
    Timeout,

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Zero-magnitude vector, cosine similarity is undefined.
    #[error("degenerate vector: {subject} has zero magnitude")]
    DegenerateVector { subject: String },

    /// NaN or infinite component; the vector cannot be ranked.
    #[error("non-finite vector: {subject} has NaN or infinite components")]
    NonFiniteVector { subject: String },

    /// Persisted cache is absent, unreadable or built for other inputs.
    #[error("embedding cache unavailable at {}: {reason}", path.display())]
    CacheUnavailable {
        path: PathBuf,
        reason: CacheUnavailableReason,
    },

    /// Embedding a dataset record failed during a cache build.
    #[error("failed to embed record {row} ({preview:?}): {source}")]
    RecordFailed {
        row: usize,
        preview: String,
        #[source]
        source: Box<EmbeddingError>,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
    /// Whether this error came from talking to the remote provider
    /// (network, auth, rate limit, malformed payload).
    pub fn is_provider_error(&self) -> bool {
        match self {
            Self::ProviderNotConfigured
            | Self::ApiRequest(_)
            | Self::InvalidResponse(_)
            | Self::RateLimited { .. }
            | Self::Timeout
            | Self::Http(_) => true,
            Self::RecordFailed { source, .. } => source.is_provider_error(),
            _ => false,
        }
    }

    /// Whether the persisted cache should be rebuilt rather than treated as fatal.
    pub fn is_cache_unavailable(&self) -> bool {
        matches!(self, Self::CacheUnavailable { .. })
    }
}

/// Why a persisted cache could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUnavailableReason {
    /// No artifact on disk.
    Missing,

    /// Artifact exists but does not parse or fails its own consistency checks.
    Corrupt(String),

    /// Artifact is well formed but was built for another dataset or model.
    Stale(String),
}

impl fmt::Display for CacheUnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => write!(f, "not found"),
            Self::Corrupt(detail) => write!(f, "corrupt ({detail})"),
            Self::Stale(detail) => write!(f, "stale ({detail})"),
        }
    }
}
