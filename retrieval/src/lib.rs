//! # Reply Retrieval
//!
//! Retrieval-augmented reply generation over historical customer-support
//! exchanges.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         ReplyEngine                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  CSV ──► dataset ──► EmbeddingStore ──► SimilarityIndex        │
//! │                                              │                  │
//! │  message ──► EmbeddingProvider ──► nearest(k)                   │
//! │                                              ▼                  │
//! │                       prompt::compose ──► CompletionProvider    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replygen_retrieval::{ReplyConfig, ReplyEngine};
//!
//! let config = ReplyConfig::load("replygen.toml").await?;
//! let engine = ReplyEngine::builder().with_config(config).build().await?;
//!
//! let reply = engine
//!     .retrieve_and_generate("my battery died", "Acme", 1)
//!     .await?;
//! println!("{}", reply.generated_text);
//! ```

pub mod completion;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod prompt;

pub use completion::{CompletionProvider, CompletionRequest, CompletionResponse, OpenAIChatProvider};
pub use config::ReplyConfig;
pub use engine::{EngineStats, GeneratedReply, ReplyEngine, ReplyEngineBuilder};
pub use error::{Result, RetrievalError};

// Re-export from dependencies for convenience
pub use replygen_embeddings::{
    EmbeddingError, EmbeddingProvider, HashingProvider, Match, Record, SimilarityIndex,
};
