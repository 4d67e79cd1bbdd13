//! Reply handler for the HTTP server.
//!
//! Translates request payloads into engine calls and engine results into
//! the response shape the web form expects.

use std::sync::Arc;

use replygen_retrieval::engine::EngineStats;
use replygen_retrieval::{ReplyEngine, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Parameters of `POST /generate_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateParams {
    /// The customer's message.
    pub tweet: String,

    /// Company to answer for; the configured default when absent or blank.
    #[serde(default)]
    pub company: Option<String>,

    /// Number of exemplars; the configured default when absent.
    #[serde(default)]
    pub k: Option<usize>,
}

/// Body returned by `POST /generate_response`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    pub similar_tweet: String,
    pub similar_response: String,
    pub similarity_score: f32,
    pub company: String,
}

/// Body returned by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(flatten)]
    pub stats: EngineStats,
}

/// Handler for reply generation requests.
pub struct ReplyHandler {
    engine: Arc<ReplyEngine>,
}

impl ReplyHandler {
    /// Create a handler over a fully initialized engine.
    pub fn new(engine: Arc<ReplyEngine>) -> Self {
        Self { engine }
    }

    /// Draft a reply to `params.tweet`.
    pub async fn generate(&self, params: GenerateParams) -> Result<GenerateResponse> {
        let k = params
            .k
            .unwrap_or(self.engine.config().generation.top_k);
        let company = params.company.unwrap_or_default();

        let reply = self
            .engine
            .retrieve_and_generate(&params.tweet, &company, k)
            .await?;

        info!(
            "Answered for {} with exemplar {} (score {:.4})",
            reply.company, reply.matched_example.row, reply.similarity_score
        );

        Ok(GenerateResponse {
            response: reply.generated_text,
            similar_tweet: reply.matched_example.customer_message,
            similar_response: reply.matched_example.company_reply,
            similarity_score: reply.similarity_score,
            company: reply.company,
        })
    }

    /// Report readiness and index statistics.
    pub fn health(&self) -> HealthResponse {
        HealthResponse {
            status: "ok".to_string(),
            stats: self.engine.stats(),
        }
    }
}
