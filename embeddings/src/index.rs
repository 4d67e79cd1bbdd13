//! Exact, brute-force similarity index over an embedding cache.

use std::sync::Arc;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::EmbeddingCache;
use crate::error::{EmbeddingError, Result};
use crate::record::Record;
use crate::similarity::{cosine_from_parts, dot_product, magnitude};

/// A ranked match from the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    /// The matched historical exchange.
    pub record: Record,

    /// Cosine similarity to the query.
    pub score: f32,
}

/// A read-only similarity index over a built cache.
///
/// Every query scans all scorable entries (O(N·d)). Results are exact and
/// deterministic: equal scores come back in dataset order. Entries whose
/// vector has no direction (zero or non-finite magnitude) are left out of
/// scoring and reported by [`SimilarityIndex::excluded`].
pub struct SimilarityIndex {
    /// Shared, immutable cache.
    cache: Arc<EmbeddingCache>,

    /// Position and precomputed norm of every scorable entry, in cache order.
    scorable: Vec<(usize, f64)>,

    /// Rows excluded from scoring.
    excluded: Vec<usize>,
}

impl SimilarityIndex {
    /// Create an index over `cache`.
    ///
    /// Fails with [`EmbeddingError::DimensionMismatch`] if any vector
    /// disagrees with the cache dimension.
    pub fn new(cache: Arc<EmbeddingCache>) -> Result<Self> {
        let dimension = cache.dimension();
        let mut scorable = Vec::with_capacity(cache.len());
        let mut excluded = Vec::new();

        for (position, entry) in cache.entries().iter().enumerate() {
            if entry.embedding.len() != dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dimension,
                    actual: entry.embedding.len(),
                });
            }
            let norm = magnitude(&entry.embedding);
            if norm == 0.0 || !norm.is_finite() {
                warn!(
                    "Excluding record {} ({:?}) from scoring: vector magnitude is {norm}",
                    entry.record.row,
                    entry.record.preview()
                );
                excluded.push(entry.record.row);
                continue;
            }
            scorable.push((position, norm));
        }

        info!(
            "Similarity index ready: {} entries, {} excluded, dimension {dimension}",
            scorable.len(),
            excluded.len()
        );
        Ok(Self {
            cache,
            scorable,
            excluded,
        })
    }

    /// Get the number of scorable entries in the index.
    pub fn len(&self) -> usize {
        self.scorable.len()
    }

    /// Check if the index has nothing to score.
    pub fn is_empty(&self) -> bool {
        self.scorable.is_empty()
    }

    /// Rows whose vectors cannot be scored.
    pub fn excluded(&self) -> &[usize] {
        &self.excluded
    }

    /// Dimension every query must have.
    pub fn dimension(&self) -> usize {
        self.cache.dimension()
    }

    /// Rank the cache against `query` and return at most `k` matches,
    /// highest score first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Match>> {
        let query_norm = magnitude(query);
        if !query_norm.is_finite() {
            return Err(EmbeddingError::NonFiniteVector {
                subject: "query".to_string(),
            });
        }
        if query_norm == 0.0 {
            return Err(EmbeddingError::DegenerateVector {
                subject: "query".to_string(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        let entries = self.cache.entries();
        let mut scored: Vec<(usize, OrderedFloat<f32>)> = Vec::with_capacity(self.len());
        for &(position, norm) in &self.scorable {
            let dot = dot_product(query, &entries[position].embedding)?;
            scored.push((position, OrderedFloat(cosine_from_parts(dot, query_norm, norm))));
        }

        // Stable sort keeps dataset order among equal scores.
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.truncate(k);

        let results: Vec<Match> = scored
            .into_iter()
            .map(|(position, score)| Match {
                record: entries[position].record.clone(),
                score: score.0,
            })
            .collect();

        debug!(
            "Ranked {} entries, returning {} (best score {:?})",
            self.len(),
            results.len(),
            results.first().map(|m| m.score)
        );
        Ok(results)
    }

    /// The single most similar record, or `None` for an empty index.
    pub fn best(&self, query: &[f32]) -> Result<Option<Match>> {
        Ok(self.nearest(query, 1)?.into_iter().next())
    }
}
