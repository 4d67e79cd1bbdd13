//! Persisted embedding cache for the exemplar dataset.
//!
//! The cache is a flat table: one entry per dataset record, holding the
//! record itself, a hash of the embedded text and the vector. It is written
//! as a single self-describing JSON document. While a build is running,
//! finished vectors are also appended to a `.partial` checkpoint so an
//! interrupted build can resume without calling the provider again.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::error::{CacheUnavailableReason, EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingRequest, prepare_input};
use crate::record::Record;

/// Format marker written into every cache artifact.
const CACHE_FORMAT: &str = "replygen-embedding-cache";

/// Current artifact layout version.
const CACHE_VERSION: u32 = 2;

/// Cache entry for one dataset record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The record whose customer message was embedded.
    pub record: Record,

    /// Hash of the model id and the embedded text.
    pub text_hash: String,

    /// The embedding vector.
    pub embedding: Embedding,
}

/// Hash identifying an embedding input under a given model.
pub fn text_hash(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(prepare_input(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Validity key for a whole dataset: changes whenever the model, the number
/// of records or any field of any record changes.
pub fn dataset_fingerprint<'a>(model: &str, records: impl IntoIterator<Item = &'a Record>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    let mut count = 0u64;
    for record in records {
        for field in [
            &record.customer_message,
            &record.company_reply,
            &record.company,
        ] {
            // Length prefix keeps field boundaries unambiguous.
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        count += 1;
    }
    hasher.update(count.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// An immutable set of embedded records.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingCache {
    model: String,
    dimension: usize,
    fingerprint: String,
    created_at: DateTime<Utc>,
    entries: Vec<CacheEntry>,
}

impl EmbeddingCache {
    /// Assemble a cache from records and their vectors, in dataset order.
    pub fn from_pairs(model: impl Into<String>, pairs: Vec<(Record, Embedding)>) -> Result<Self> {
        let model = model.into();
        let dimension = pairs.first().map_or(0, |(_, e)| e.len());

        let mut entries = Vec::with_capacity(pairs.len());
        for (record, embedding) in pairs {
            if embedding.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
            entries.push(CacheEntry {
                text_hash: text_hash(&model, &record.customer_message),
                record,
                embedding,
            });
        }

        let fingerprint = dataset_fingerprint(&model, entries.iter().map(|e| &e.record));
        Ok(Self {
            model,
            dimension,
            fingerprint,
            created_at: Utc::now(),
            entries,
        })
    }

    /// Model the vectors were produced with.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Shared length of every vector (0 for an empty cache).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Dataset validity key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// When the cache was built.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Entries in dataset order.
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Number of cached records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Describe why this cache cannot serve `records` under `model`, if it can't.
    pub fn staleness(&self, records: &[Record], model: &str) -> Option<String> {
        if self.model != model {
            return Some(format!(
                "built with model {}, configured model is {model}",
                self.model
            ));
        }
        if self.entries.len() != records.len() {
            return Some(format!(
                "holds {} records, dataset has {}",
                self.entries.len(),
                records.len()
            ));
        }
        if self.fingerprint != dataset_fingerprint(model, records) {
            return Some("dataset content changed since the cache was built".to_string());
        }
        None
    }
}

/// On-disk layout of a cache artifact.
#[derive(Serialize)]
struct CacheFileRef<'a> {
    format: &'a str,
    version: u32,
    model: &'a str,
    dimension: usize,
    fingerprint: &'a str,
    created_at: DateTime<Utc>,
    entries: &'a [CacheEntry],
}

#[derive(Deserialize)]
struct CacheFile {
    format: String,
    version: u32,
    model: String,
    dimension: usize,
    fingerprint: String,
    created_at: DateTime<Utc>,
    entries: Vec<CacheEntry>,
}

/// One line of the build checkpoint.
#[derive(Serialize, Deserialize)]
struct CheckpointLine {
    model: String,
    text_hash: String,
    embedding: Embedding,
}

/// Durable home of an [`EmbeddingCache`].
pub struct EmbeddingStore {
    /// Path of the cache artifact.
    path: PathBuf,
}

impl EmbeddingStore {
    /// Create a store backed by the artifact at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Path of the cache artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the in-progress build checkpoint.
    pub fn checkpoint_path(&self) -> PathBuf {
        let mut raw = self.path.as_os_str().to_owned();
        raw.push(".partial");
        PathBuf::from(raw)
    }

    fn unavailable(&self, reason: CacheUnavailableReason) -> EmbeddingError {
        EmbeddingError::CacheUnavailable {
            path: self.path.clone(),
            reason,
        }
    }

    /// Read the persisted cache.
    ///
    /// Returns [`EmbeddingError::CacheUnavailable`] with
    /// [`CacheUnavailableReason::Missing`] when there is no artifact and
    /// [`CacheUnavailableReason::Corrupt`] when it cannot be trusted.
    pub async fn load(&self) -> Result<EmbeddingCache> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(self.unavailable(CacheUnavailableReason::Missing));
            }
            Err(e) => {
                return Err(self.unavailable(CacheUnavailableReason::Corrupt(format!(
                    "unreadable: {e}"
                ))));
            }
        };

        let file: CacheFile = serde_json::from_str(&content)
            .map_err(|e| self.unavailable(CacheUnavailableReason::Corrupt(e.to_string())))?;

        if file.format != CACHE_FORMAT || file.version != CACHE_VERSION {
            return Err(self.unavailable(CacheUnavailableReason::Corrupt(format!(
                "unexpected format {} v{}",
                file.format, file.version
            ))));
        }

        for (position, entry) in file.entries.iter().enumerate() {
            if entry.record.row != position {
                return Err(self.unavailable(CacheUnavailableReason::Corrupt(format!(
                    "entry {position} carries row {}",
                    entry.record.row
                ))));
            }
            if entry.embedding.len() != file.dimension {
                return Err(self.unavailable(CacheUnavailableReason::Corrupt(format!(
                    "entry {position} has {} dimensions, header says {}",
                    entry.embedding.len(),
                    file.dimension
                ))));
            }
        }

        let fingerprint = dataset_fingerprint(&file.model, file.entries.iter().map(|e| &e.record));
        if fingerprint != file.fingerprint {
            return Err(self.unavailable(CacheUnavailableReason::Corrupt(
                "fingerprint does not match entries".to_string(),
            )));
        }

        info!(
            "Loaded {} cached embeddings from {}",
            file.entries.len(),
            self.path.display()
        );

        Ok(EmbeddingCache {
            model: file.model,
            dimension: file.dimension,
            fingerprint: file.fingerprint,
            created_at: file.created_at,
            entries: file.entries,
        })
    }

    /// Load the cache and check it was built for exactly `records` under `model`.
    pub async fn load_for(&self, records: &[Record], model: &str) -> Result<EmbeddingCache> {
        let cache = self.load().await?;
        if let Some(detail) = cache.staleness(records, model) {
            return Err(self.unavailable(CacheUnavailableReason::Stale(detail)));
        }
        Ok(cache)
    }

    /// Persist `cache`, replacing any previous artifact atomically, and drop
    /// the build checkpoint.
    pub async fn save(&self, cache: &EmbeddingCache) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = CacheFileRef {
            format: CACHE_FORMAT,
            version: CACHE_VERSION,
            model: &cache.model,
            dimension: cache.dimension,
            fingerprint: &cache.fingerprint,
            created_at: cache.created_at,
            entries: &cache.entries,
        };
        let content = serde_json::to_string(&file)?;

        let mut temp_raw = self.path.as_os_str().to_owned();
        temp_raw.push(".tmp");
        let temp_path = PathBuf::from(temp_raw);
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;

        match fs::remove_file(self.checkpoint_path()).await {
            Ok(()) => debug!("Removed build checkpoint"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        info!(
            "Saved {} cached embeddings to {}",
            cache.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Embed every record's customer message.
    ///
    /// Vectors already present in `reuse` or in the checkpoint (same model and
    /// text), and repeated texts inside `records`, are reused instead of
    /// calling the provider. The first provider failure aborts the build with
    /// [`EmbeddingError::RecordFailed`]; the cache artifact is never written
    /// here, call [`EmbeddingStore::save`] with the result.
    pub async fn build(
        &self,
        records: &[Record],
        provider: &dyn EmbeddingProvider,
        reuse: Option<&EmbeddingCache>,
    ) -> Result<EmbeddingCache> {
        let model = provider.default_model().to_string();
        let mut known = self.resume_checkpoint(&model).await?;
        if let Some(previous) = reuse {
            // text_hash covers the model, so vectors from another model never match.
            for entry in previous.entries() {
                known
                    .entry(entry.text_hash.clone())
                    .or_insert_with(|| entry.embedding.clone());
            }
        }
        let resumed = known.len();

        let mut checkpoint = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.checkpoint_path())
            .await?;

        info!(
            "Building embedding cache for {} records with {} ({resumed} vectors resumed)",
            records.len(),
            provider.name()
        );

        let mut pairs = Vec::with_capacity(records.len());
        let mut dimension: Option<usize> = None;
        let mut computed = 0usize;

        for record in records {
            let hash = text_hash(&model, &record.customer_message);

            let embedding = match known.get(&hash).cloned() {
                Some(embedding) => embedding,
                None => {
                    let response = provider
                        .embed(EmbeddingRequest::new(&record.customer_message).with_model(&model))
                        .await
                        .map_err(|e| record_failed(record, e))?;
                    if response.embedding.is_empty() {
                        return Err(record_failed(
                            record,
                            EmbeddingError::InvalidResponse("empty vector".to_string()),
                        ));
                    }
                    // JSON has no NaN or infinity, so such a vector could not be persisted.
                    if response.embedding.iter().any(|v| !v.is_finite()) {
                        return Err(record_failed(
                            record,
                            EmbeddingError::InvalidResponse(
                                "vector has NaN or infinite components".to_string(),
                            ),
                        ));
                    }

                    let line = CheckpointLine {
                        model: model.clone(),
                        text_hash: hash.clone(),
                        embedding: response.embedding,
                    };
                    let mut serialized = serde_json::to_string(&line)?;
                    serialized.push('\n');
                    checkpoint.write_all(serialized.as_bytes()).await?;
                    // Must be on disk before the next provider call can fail.
                    checkpoint.flush().await?;

                    computed += 1;
                    if computed % 100 == 0 {
                        info!("Embedded {computed} records so far");
                    }
                    known.insert(hash, line.embedding.clone());
                    line.embedding
                }
            };

            let expected = *dimension.get_or_insert(embedding.len());
            if embedding.len() != expected {
                return Err(record_failed(
                    record,
                    EmbeddingError::DimensionMismatch {
                        expected,
                        actual: embedding.len(),
                    },
                ));
            }

            pairs.push((record.clone(), embedding));
        }

        checkpoint.flush().await?;
        info!(
            "Embedding cache built: {} records, {computed} provider calls",
            pairs.len()
        );
        EmbeddingCache::from_pairs(model, pairs)
    }

    /// Read reusable vectors from the checkpoint and rewrite it with only the
    /// valid lines for `model`, so later appends start on a clean line.
    async fn resume_checkpoint(&self, model: &str) -> Result<HashMap<String, Embedding>> {
        let path = self.checkpoint_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent).await?;
                    }
                }
                return Ok(HashMap::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut known = HashMap::new();
        let mut kept = String::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CheckpointLine>(line) {
                Ok(entry) if entry.model == model => {
                    kept.push_str(line);
                    kept.push('\n');
                    known.insert(entry.text_hash, entry.embedding);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Ignoring checkpoint from line {} onward: {e}", number + 1);
                    break;
                }
            }
        }

        fs::write(&path, kept).await?;
        Ok(known)
    }
}

fn record_failed(record: &Record, source: EmbeddingError) -> EmbeddingError {
    EmbeddingError::RecordFailed {
        row: record.row,
        preview: record.preview(),
        source: Box::new(source),
    }
}
