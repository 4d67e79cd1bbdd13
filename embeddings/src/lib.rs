//! # Embeddings
//!
//! Embedding generation, persistence and exact similarity search for the
//! replygen exemplar retriever.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert customer messages to dense vectors
//! - **Cache Store**: Persist vectors next to their records so restarts skip the provider
//! - **Similarity Search**: Brute-force cosine ranking with stable tie-breaking
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Record ──► EmbeddingProvider ──► EmbeddingStore (build/save)  │
//! │                                        │                        │
//! │                                        ▼                        │
//! │                  EmbeddingCache ──► SimilarityIndex            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod index;
pub mod provider;
pub mod record;
pub mod similarity;

pub use cache::{CacheEntry, EmbeddingCache, EmbeddingStore};
pub use error::{CacheUnavailableReason, EmbeddingError, Result};
pub use index::{Match, SimilarityIndex};
pub use provider::{
    EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, HashingProvider, OpenAIProvider,
};
pub use record::Record;
pub use similarity::cosine_similarity;

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
