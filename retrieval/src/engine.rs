//! Reply engine: the explicitly constructed context that owns the dataset
//! index and both providers.

use std::sync::Arc;
use std::time::Duration;

use replygen_embeddings::provider::RetryPolicy;
use replygen_embeddings::{
    CacheUnavailableReason, EmbeddingCache, EmbeddingError, EmbeddingProvider, EmbeddingRequest,
    EmbeddingStore, HashingProvider, Match, OpenAIProvider, Record, SimilarityIndex,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::completion::{CompletionProvider, CompletionRequest, OpenAIChatProvider};
use crate::config::{EmbeddingProviderType, ReplyConfig};
use crate::dataset::load_dataset;
use crate::error::{Result, RetrievalError};
use crate::prompt::compose;

/// Outcome of one retrieve-then-generate request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedReply {
    /// Text produced by the completion model.
    pub generated_text: String,

    /// Best matching historical exchange.
    pub matched_example: Record,

    /// Cosine similarity of the best match.
    pub similarity_score: f32,

    /// Every exemplar placed in the prompt, best first.
    pub exemplars: Vec<Match>,

    /// Company the reply was written for.
    pub company: String,

    /// The prompt sent to the completion model.
    pub prompt: String,
}

/// Retrieval-augmented reply generator.
///
/// Built once, then shared read-only (usually behind an `Arc`) by every
/// request. Nothing in it mutates after construction.
pub struct ReplyEngine {
    /// Configuration.
    config: ReplyConfig,

    /// Index over the embedded dataset.
    index: SimilarityIndex,

    /// Embeds incoming messages; must be the provider the cache was built with.
    embedder: Arc<dyn EmbeddingProvider>,

    /// Drafts replies.
    completer: Arc<dyn CompletionProvider>,
}

impl ReplyEngine {
    /// Create a new engine builder.
    pub fn builder() -> ReplyEngineBuilder {
        ReplyEngineBuilder::new()
    }

    /// Assemble an engine from an already built cache.
    pub fn from_cache(
        config: ReplyConfig,
        cache: EmbeddingCache,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        config.validate()?;
        if !cache.is_empty() && cache.model() != embedder.default_model() {
            return Err(RetrievalError::Config(format!(
                "cache was built with {}, query embedder uses {}",
                cache.model(),
                embedder.default_model()
            )));
        }
        let index = SimilarityIndex::new(Arc::new(cache))?;
        Ok(Self {
            config,
            index,
            embedder,
            completer,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &ReplyConfig {
        &self.config
    }

    /// The similarity index.
    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    /// Embed `message` and return the `k` most similar historical exchanges.
    ///
    /// `k` is clamped to `generation.max_k`.
    pub async fn retrieve(&self, message: &str, k: usize) -> Result<Vec<Match>> {
        if message.trim().is_empty() {
            return Err(RetrievalError::Validation(
                "customer message must not be empty".to_string(),
            ));
        }
        if k == 0 {
            return Err(RetrievalError::Validation(
                "k must be at least 1".to_string(),
            ));
        }
        if self.index.is_empty() {
            return Err(RetrievalError::Dataset(
                "no historical exchanges are loaded".to_string(),
            ));
        }

        let max_k = self.config.generation.max_k;
        if k > max_k {
            debug!("Clamping k from {k} to {max_k}");
        }
        let k = k.min(max_k);

        let request =
            EmbeddingRequest::new(message).with_model(self.embedder.default_model().to_string());
        let response = self.embedder.embed(request).await?;
        if response.embedding.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingError::InvalidResponse(format!(
                "{} returned a non-finite embedding",
                self.embedder.name()
            ))
            .into());
        }

        let matches = if k == 1 {
            self.index.best(&response.embedding)?.into_iter().collect()
        } else {
            self.index.nearest(&response.embedding, k)?
        };

        debug!(
            "Retrieved {} exemplars (best score {:?})",
            matches.len(),
            matches.first().map(|m| m.score)
        );
        Ok(matches)
    }

    /// Retrieve the `k` best exemplars for `message` and have the completion
    /// model draft a reply in their style on behalf of `company`.
    ///
    /// A blank `company` falls back to the configured default.
    pub async fn retrieve_and_generate(
        &self,
        message: &str,
        company: &str,
        k: usize,
    ) -> Result<GeneratedReply> {
        let company = match company.trim() {
            "" => self.config.generation.default_company.clone(),
            named => named.to_string(),
        };

        let exemplars = self.retrieve(message, k).await?;
        let best = exemplars.first().cloned().ok_or_else(|| {
            RetrievalError::Dataset("no exemplar matched the message".to_string())
        })?;

        let prompt = compose(message, &company, &exemplars);
        let request = CompletionRequest::new(prompt.clone())
            .with_model(self.config.completion.model.clone())
            .with_temperature(self.config.completion.temperature);
        let response = self.completer.complete(request).await?;

        info!(
            "Generated reply for {company} using record {} (score {:.4})",
            best.record.row, best.score
        );

        Ok(GeneratedReply {
            generated_text: response.text,
            matched_example: best.record,
            similarity_score: best.score,
            exemplars,
            company,
            prompt,
        })
    }

    /// Get engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            records: self.index.len(),
            excluded_records: self.index.excluded().len(),
            dimension: self.index.dimension(),
            embedding_provider: self.embedder.name().to_string(),
            embedding_model: self.embedder.default_model().to_string(),
            completion_provider: self.completer.name().to_string(),
            completion_model: self.config.completion.model.clone(),
        }
    }
}

/// Builder for [`ReplyEngine`].
pub struct ReplyEngineBuilder {
    config: ReplyConfig,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    completer: Option<Arc<dyn CompletionProvider>>,
    rebuild_cache: bool,
}

impl ReplyEngineBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: ReplyConfig::default(),
            embedder: None,
            completer: None,
            rebuild_cache: false,
        }
    }

    /// Use `config`.
    pub fn with_config(mut self, config: ReplyConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this embedding provider instead of the configured one.
    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    /// Use this completion provider instead of the configured one.
    pub fn with_completion_provider(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completer = Some(provider);
        self
    }

    /// Ignore any persisted cache and embed the dataset again.
    pub fn rebuild_cache(mut self, rebuild: bool) -> Self {
        self.rebuild_cache = rebuild;
        self
    }

    /// Load the dataset, load or build the embedding cache, and index it.
    pub async fn build(self) -> Result<ReplyEngine> {
        let config = self.config;
        config.validate()?;

        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => embedding_provider_from_config(&config)?,
        };
        if !embedder.is_available() {
            return Err(RetrievalError::Config(format!(
                "embedding provider {} is not available",
                embedder.name()
            )));
        }
        let completer = match self.completer {
            Some(completer) => completer,
            None => completion_provider_from_config(&config)?,
        };

        let records = load_dataset(&config.dataset)?;
        let cache = prepare_cache(&config, &records, embedder.as_ref(), self.rebuild_cache).await?;

        ReplyEngine::from_cache(config, cache, embedder, completer)
    }
}

impl Default for ReplyEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load the persisted cache for `records`, or build and save a fresh one
/// when it is missing, corrupt, stale or `rebuild` is set.
///
/// A stale cache still donates the vectors of messages whose text did not
/// change, so edits to replies or companies cost no provider calls.
pub async fn prepare_cache(
    config: &ReplyConfig,
    records: &[Record],
    embedder: &dyn EmbeddingProvider,
    rebuild: bool,
) -> Result<EmbeddingCache> {
    let store = EmbeddingStore::new(&config.cache.path);
    let mut previous = None;

    if rebuild {
        info!("Rebuilding embedding cache as requested");
    } else {
        match store.load_for(records, embedder.default_model()).await {
            Ok(cache) => return Ok(cache),
            Err(EmbeddingError::CacheUnavailable {
                reason: CacheUnavailableReason::Stale(detail),
                ..
            }) => {
                warn!("Embedding cache is stale ({detail}); recomputing changed entries");
                previous = store.load().await.ok();
            }
            Err(e) if e.is_cache_unavailable() => warn!("{e}; computing embeddings"),
            Err(e) => return Err(e.into()),
        }
    }

    let cache = store.build(records, embedder, previous.as_ref()).await?;
    store.save(&cache).await?;
    Ok(cache)
}

/// Construct the embedding provider named in `config`.
pub fn embedding_provider_from_config(config: &ReplyConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    let settings = &config.embedding;
    match settings.provider {
        EmbeddingProviderType::OpenAI => {
            let api_key = config.api_key().ok_or_else(|| {
                RetrievalError::Config(
                    "OpenAI embeddings need an API key (openai_api_key or OPENAI_API_KEY)"
                        .to_string(),
                )
            })?;
            let mut provider = OpenAIProvider::new()
                .with_api_key(api_key)
                .with_base_url(settings.base_url.clone())
                .with_timeout(Duration::from_secs(settings.timeout_secs))
                .with_retry(RetryPolicy::new(settings.max_retries));
            if let Some(model) = &settings.model {
                provider = provider.with_model(model.clone());
            }
            if let Some(dimensions) = settings.dimensions {
                provider = provider.with_dimensions(dimensions);
            }
            Ok(Arc::new(provider))
        }
        EmbeddingProviderType::Hashing => Ok(Arc::new(HashingProvider::new(
            settings.dimensions.unwrap_or(256),
        ))),
    }
}

/// Construct the completion provider described by `config`.
pub fn completion_provider_from_config(
    config: &ReplyConfig,
) -> Result<Arc<dyn CompletionProvider>> {
    let settings = &config.completion;
    let api_key = config.api_key().ok_or_else(|| {
        RetrievalError::Config(
            "OpenAI completions need an API key (openai_api_key or OPENAI_API_KEY)".to_string(),
        )
    })?;
    Ok(Arc::new(
        OpenAIChatProvider::new()
            .with_api_key(api_key)
            .with_base_url(settings.base_url.clone())
            .with_model(settings.model.clone())
            .with_timeout(Duration::from_secs(settings.timeout_secs))
            .with_retry(RetryPolicy::new(settings.max_retries)),
    ))
}

/// Statistics about the reply engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStats {
    /// Number of indexed records.
    pub records: usize,

    /// Records left out of ranking because their vector has no direction.
    pub excluded_records: usize,

    /// Embedding dimension.
    pub dimension: usize,

    /// Embedding provider name.
    pub embedding_provider: String,

    /// Embedding model id.
    pub embedding_model: String,

    /// Completion provider name.
    pub completion_provider: String,

    /// Completion model id.
    pub completion_model: String,
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use replygen_embeddings::{Embedding, EmbeddingResponse};
    use tempfile::TempDir;

    use super::*;
    use crate::completion::CompletionResponse;

    /// Answers every request with a fixed vector under the hashing model id.
    struct FixedEmbedder {
        vector: Embedding,
        available: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed"
        }

        fn default_model(&self) -> &str {
            "token-hash-v1"
        }

        fn default_dimension(&self) -> usize {
            self.vector.len()
        }

        async fn embed(
            &self,
            _request: EmbeddingRequest,
        ) -> replygen_embeddings::Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                embedding: self.vector.clone(),
                model: "token-hash-v1".to_string(),
                dimension: self.vector.len(),
                tokens_used: None,
            })
        }

        fn is_available(&self) -> bool {
            self.available
        }
    }

    /// Records prompts and answers with a canned reply.
    struct CannedCompleter {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedCompleter {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for CannedCompleter {
        fn name(&self) -> &str {
            "canned"
        }

        fn default_model(&self) -> &str {
            "canned-model"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
            self.prompts.lock().unwrap().push(request.prompt);
            Ok(CompletionResponse {
                text: self.reply.clone(),
                model: "canned-model".to_string(),
            })
        }
    }

    struct FailingCompleter;

    #[async_trait]
    impl CompletionProvider for FailingCompleter {
        fn name(&self) -> &str {
            "failing"
        }

        fn default_model(&self) -> &str {
            "failing-model"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
            Err(RetrievalError::Completion("API error 503: overloaded".to_string()))
        }
    }

    fn engine_over(records: Vec<Record>, completer: Arc<dyn CompletionProvider>) -> ReplyEngine {
        engine_with(
            ReplyConfig::default(),
            records,
            Arc::new(HashingProvider::new(256)),
            completer,
        )
    }

    fn engine_with(
        config: ReplyConfig,
        records: Vec<Record>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> ReplyEngine {
        let hashing = HashingProvider::new(256);
        let pairs = records
            .into_iter()
            .map(|r| {
                let v = hashing.embed_text(&r.customer_message);
                (r, v)
            })
            .collect();
        let cache = EmbeddingCache::from_pairs("token-hash-v1", pairs).unwrap();
        ReplyEngine::from_cache(config, cache, embedder, completer).unwrap()
    }

    fn support_records() -> Vec<Record> {
        vec![
            Record::new(0, "battery dies fast", "Please DM us your order #", "Acme"),
            Record::new(1, "package never arrived", "Sorry! Which carrier?", "Shipco"),
            Record::new(2, "refund still pending", "We'll check on that refund.", "Acme"),
        ]
    }

    #[tokio::test]
    async fn test_single_record_end_to_end() {
        let completer = Arc::new(CannedCompleter::new("So sorry! Please DM us."));
        let engine = engine_over(
            vec![Record::new(0, "battery dies fast", "Please DM us your order #", "Acme")],
            completer.clone(),
        );

        let reply = engine
            .retrieve_and_generate("my battery died", "Acme", 1)
            .await
            .unwrap();

        assert_eq!(reply.matched_example.customer_message, "battery dies fast");
        assert!(reply.similarity_score > 0.0);
        assert_eq!(reply.generated_text, "So sorry! Please DM us.");
        assert_eq!(reply.exemplars.len(), 1);

        let prompts = completer.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("battery dies fast"));
        assert!(prompts[0].contains("Please DM us your order #"));
        assert!(prompts[0].contains("my battery died"));
        assert_eq!(prompts[0], reply.prompt);
    }

    #[tokio::test]
    async fn test_retrieve_prefers_overlapping_words() {
        let engine = engine_over(support_records(), Arc::new(CannedCompleter::new("ok")));
        let matches = engine.retrieve("my package has not arrived", 3).await.unwrap();

        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].record.row, 1);
    }

    #[tokio::test]
    async fn test_blank_company_uses_default() {
        let engine = engine_over(support_records(), Arc::new(CannedCompleter::new("ok")));
        let reply = engine
            .retrieve_and_generate("refund please", "   ", 1)
            .await
            .unwrap();
        assert_eq!(reply.company, "Amazon");
        assert!(reply.prompt.contains("company called Amazon."));
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let engine = engine_over(support_records(), Arc::new(CannedCompleter::new("ok")));
        let err = engine.retrieve_and_generate("  \n", "Acme", 1).await.unwrap_err();
        assert!(err.is_validation_error());
    }

    #[tokio::test]
    async fn test_zero_k_is_rejected() {
        let engine = engine_over(support_records(), Arc::new(CannedCompleter::new("ok")));
        let err = engine.retrieve("hello", 0).await.unwrap_err();
        assert!(err.is_validation_error());
    }

    #[tokio::test]
    async fn test_message_without_tokens_is_degenerate() {
        let engine = engine_over(support_records(), Arc::new(CannedCompleter::new("ok")));
        let err = engine.retrieve("?!?", 1).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Embedding(EmbeddingError::DegenerateVector { .. })
        ));
    }

    #[tokio::test]
    async fn test_non_finite_query_embedding_is_provider_error() {
        let mut vector = vec![0.0; 256];
        vector[0] = f32::NAN;
        vector[1] = 1.0;
        let engine = engine_with(
            ReplyConfig::default(),
            support_records(),
            Arc::new(FixedEmbedder {
                vector,
                available: true,
            }),
            Arc::new(CannedCompleter::new("ok")),
        );

        let err = engine.retrieve("battery", 2).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::Embedding(EmbeddingError::InvalidResponse(_))
        ));
        assert!(err.is_provider_error());
    }

    #[tokio::test]
    async fn test_k_is_clamped_to_max_k() {
        let mut config = ReplyConfig::default();
        config.generation.max_k = 2;
        let completer = Arc::new(CannedCompleter::new("ok"));
        let engine = engine_with(
            config,
            support_records(),
            Arc::new(HashingProvider::new(256)),
            completer.clone(),
        );

        let reply = engine
            .retrieve_and_generate("refund for my package", "Acme", 50)
            .await
            .unwrap();
        assert_eq!(reply.exemplars.len(), 2);
        assert!(reply.prompt.contains("Example 2 :"));
        assert!(!reply.prompt.contains("Example 3 :"));
    }

    #[tokio::test]
    async fn test_degenerate_record_is_left_out_of_ranking() {
        let mut records = support_records();
        records.push(Record::new(3, "?!?", "Hi there!", "Acme"));
        let engine = engine_over(records, Arc::new(CannedCompleter::new("ok")));

        let stats = engine.stats();
        assert_eq!(stats.records, 3);
        assert_eq!(stats.excluded_records, 1);

        let matches = engine.retrieve("refund pending", 10).await.unwrap();
        assert_eq!(matches.len(), 3);
        assert!(matches.iter().all(|m| m.record.row != 3));
    }

    #[tokio::test]
    async fn test_unavailable_embedder_fails_startup() {
        let dir = TempDir::new().unwrap();
        let config = ReplyConfig::default()
            .with_dataset_path(dir.path().join("missing.csv"))
            .with_cache_path(dir.path().join("embeddings.json"));

        let result = ReplyEngine::builder()
            .with_config(config)
            .with_embedding_provider(Arc::new(FixedEmbedder {
                vector: vec![1.0, 0.0],
                available: false,
            }))
            .with_completion_provider(Arc::new(CannedCompleter::new("ok")))
            .build()
            .await;

        match result {
            Err(RetrievalError::Config(message)) => assert!(message.contains("fixed")),
            Err(other) => panic!("expected config error, got {other}"),
            Ok(_) => panic!("expected config error"),
        }
    }

    #[tokio::test]
    async fn test_completion_failure_surfaces() {
        let engine = engine_over(support_records(), Arc::new(FailingCompleter));
        let err = engine
            .retrieve_and_generate("battery problem", "Acme", 1)
            .await
            .unwrap_err();
        assert!(err.is_provider_error());
    }

    #[tokio::test]
    async fn test_empty_dataset_is_an_explicit_error() {
        let engine = engine_over(Vec::new(), Arc::new(CannedCompleter::new("ok")));
        let err = engine.retrieve("hello", 1).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Dataset(_)));
    }

    #[tokio::test]
    async fn test_cache_model_must_match_embedder() {
        let cache = EmbeddingCache::from_pairs(
            "text-embedding-3-small",
            vec![(support_records()[0].clone(), vec![1.0, 0.0])],
        )
        .unwrap();
        let result = ReplyEngine::from_cache(
            ReplyConfig::default(),
            cache,
            Arc::new(HashingProvider::new(2)),
            Arc::new(CannedCompleter::new("ok")),
        );
        assert!(matches!(result, Err(RetrievalError::Config(_))));
    }

    #[tokio::test]
    async fn test_prepare_cache_builds_then_reuses() {
        let dir = TempDir::new().unwrap();
        let config = ReplyConfig::default().with_cache_path(dir.path().join("embeddings.json"));
        let embedder = HashingProvider::new(16);

        let built = prepare_cache(&config, &support_records(), &embedder, false)
            .await
            .unwrap();
        assert!(dir.path().join("embeddings.json").exists());

        let reused = prepare_cache(&config, &support_records(), &embedder, false)
            .await
            .unwrap();
        assert_eq!(reused.created_at(), built.created_at());

        let mut changed = support_records();
        changed.push(Record::new(3, "new complaint", "new reply", "Acme"));
        let rebuilt = prepare_cache(&config, &changed, &embedder, false)
            .await
            .unwrap();
        assert_eq!(rebuilt.len(), 4);
    }

    #[tokio::test]
    async fn test_prepare_cache_picks_up_reply_edits() {
        let dir = TempDir::new().unwrap();
        let config = ReplyConfig::default().with_cache_path(dir.path().join("embeddings.json"));
        let embedder = HashingProvider::new(16);

        let built = prepare_cache(&config, &support_records(), &embedder, false)
            .await
            .unwrap();

        let mut edited = support_records();
        edited[0].company_reply = "We've replaced that battery model.".to_string();
        let rebuilt = prepare_cache(&config, &edited, &embedder, false)
            .await
            .unwrap();

        assert_eq!(
            rebuilt.entries()[0].record.company_reply,
            "We've replaced that battery model."
        );
        assert_eq!(rebuilt.entries()[0].embedding, built.entries()[0].embedding);
        assert_ne!(rebuilt.fingerprint(), built.fingerprint());
    }

    #[test]
    fn test_hashing_provider_from_config() {
        let mut config = ReplyConfig::default();
        config.embedding.provider = EmbeddingProviderType::Hashing;
        config.embedding.dimensions = Some(32);

        let provider = embedding_provider_from_config(&config).unwrap();
        assert_eq!(provider.name(), "hashing");
        assert_eq!(provider.default_dimension(), 32);
    }
}
