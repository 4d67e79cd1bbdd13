//! Configuration for the reply pipeline.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration for the reply pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Historical exchanges to retrieve exemplars from.
    pub dataset: DatasetConfig,

    /// Where the embedding cache lives.
    pub cache: CacheConfig,

    /// Embedding provider configuration.
    pub embedding: EmbeddingConfig,

    /// Completion provider configuration.
    pub completion: CompletionConfig,

    /// Reply generation defaults.
    pub generation: GenerationConfig,

    /// OpenAI API key. Falls back to `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,
}

impl ReplyConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| RetrievalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RetrievalError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Set the dataset path.
    pub fn with_dataset_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataset.path = path.into();
        self
    }

    /// Set the cache artifact path.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache.path = path.into();
        self
    }

    /// Set the embedding configuration.
    pub fn with_embedding(mut self, config: EmbeddingConfig) -> Self {
        self.embedding = config;
        self
    }

    /// Set the completion configuration.
    pub fn with_completion(mut self, config: CompletionConfig) -> Self {
        self.completion = config;
        self
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.openai_api_key = Some(key.into());
        self
    }

    /// Configured API key, else the environment's.
    pub fn api_key(&self) -> Option<String> {
        self.openai_api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(fraction) = self.dataset.sample_fraction {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(RetrievalError::Config(format!(
                    "dataset.sample_fraction must be in (0, 1], got {fraction}"
                )));
            }
        }
        if self.generation.top_k == 0 {
            return Err(RetrievalError::Config(
                "generation.top_k must be at least 1".to_string(),
            ));
        }
        if self.generation.top_k > self.generation.max_k {
            return Err(RetrievalError::Config(format!(
                "generation.top_k ({}) must not exceed generation.max_k ({})",
                self.generation.top_k, self.generation.max_k
            )));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(RetrievalError::Config(format!(
                "completion.temperature must be in [0, 2], got {}",
                self.completion.temperature
            )));
        }
        if self.embedding.timeout_secs == 0 || self.completion.timeout_secs == 0 {
            return Err(RetrievalError::Config(
                "provider timeouts must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where the historical exchanges come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// CSV file with `customer_tweet`, `company_tweet` and `company` columns.
    pub path: PathBuf,

    /// Keep only this fraction of rows (deterministic, order preserving).
    pub sample_fraction: Option<f64>,

    /// Seed for sampling.
    pub sample_seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/twitter_data_clean_sample.csv"),
            sample_fraction: None,
            sample_seed: 42,
        }
    }
}

/// Where the embedding cache artifact lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Path of the JSON artifact.
    pub path: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/embeddings.json"),
        }
    }
}

/// Configuration for the embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Which provider to use.
    pub provider: EmbeddingProviderType,

    /// Model to use for embeddings.
    pub model: Option<String>,

    /// Output dimension (OpenAI `dimensions`, hashing bucket count).
    pub dimensions: Option<usize>,

    /// API base URL.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout_secs: u64,

    /// Retries after a transient failure.
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderType::OpenAI,
            model: None,
            dimensions: None,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 30,
            max_retries: 1,
        }
    }
}

/// Type of embedding provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProviderType {
    /// OpenAI embeddings API.
    #[serde(rename = "openai")]
    OpenAI,
    /// Offline token hashing.
    Hashing,
}

/// Configuration for the completion provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Chat model.
    pub model: String,

    /// Sampling temperature.
    pub temperature: f32,

    /// API base URL.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout_secs: u64,

    /// Retries after a transient failure.
    pub max_retries: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 60,
            max_retries: 1,
        }
    }
}

/// Reply generation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Company used when a request names none.
    pub default_company: String,

    /// Exemplars per prompt when a request does not say.
    pub top_k: usize,

    /// Upper bound on exemplars per prompt; larger requests are clamped.
    pub max_k: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_company: "Amazon".to_string(),
            top_k: 1,
            max_k: 10,
        }
    }
}
