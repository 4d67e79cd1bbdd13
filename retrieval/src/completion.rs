//! Completion providers.

use std::time::Duration;

use async_trait::async_trait;
use replygen_embeddings::provider::{RetryPolicy, retry_after_secs};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, RetrievalError};

/// Request for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The full prompt, sent as a single user message.
    pub prompt: String,

    /// Model to use (provider-specific).
    pub model: Option<String>,

    /// Sampling temperature.
    pub temperature: f32,
}

impl CompletionRequest {
    /// Create a new completion request.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            temperature: 0.7,
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Generated text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// The generated reply.
    pub text: String,

    /// Model that produced it.
    pub model: String,
}

/// Trait for completion providers.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;

    /// Generate text for the given prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
}

/// OpenAI chat completions provider.
pub struct OpenAIChatProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
    default_model: String,
    timeout: Option<Duration>,
    retry: RetryPolicy,
}

impl OpenAIChatProvider {
    /// Create a new provider reading `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            base_url: "https://api.openai.com/v1".to_string(),
            client: reqwest::Client::new(),
            default_model: "gpt-4o-mini".to_string(),
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the default model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Bound every request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl Default for OpenAIChatProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionProvider for OpenAIChatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| RetrievalError::Completion("API key not configured".to_string()))?;
        let model = request.model.unwrap_or_else(|| self.default_model.clone());

        let body = ChatRequest {
            model: &model,
            temperature: request.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        debug!("Requesting completion with model: {model}");

        let mut attempt = 0u32;
        let parsed: ChatResponse = loop {
            let mut builder = self.client.post(self.endpoint()).bearer_auth(api_key).json(&body);
            if let Some(timeout) = self.timeout {
                builder = builder.timeout(timeout);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response.text().await?;
                        break serde_json::from_str(&text).map_err(|e| {
                            RetrievalError::Completion(format!("malformed completion payload: {e}"))
                        })?;
                    }

                    let retry_after = retry_after_secs(&response);
                    let error_text = response.text().await.unwrap_or_default();
                    if self.retry.is_retryable_status(status) && attempt < self.retry.max_retries {
                        attempt += 1;
                        warn!("Completion request returned {status}, retrying (attempt {attempt})");
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                        continue;
                    }
                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        return Err(RetrievalError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                    }
                    return Err(RetrievalError::Completion(format!(
                        "API error {status}: {error_text}"
                    )));
                }
                Err(err) => {
                    if self.retry.is_retryable_error(&err) && attempt < self.retry.max_retries {
                        attempt += 1;
                        warn!("Completion request failed ({err}), retrying (attempt {attempt})");
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                        continue;
                    }
                    if err.is_timeout() {
                        return Err(RetrievalError::CompletionTimeout);
                    }
                    return Err(err.into());
                }
            }
        };

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| RetrievalError::Completion("no message content in response".to_string()))?;

        Ok(CompletionResponse {
            text,
            model: parsed.model.unwrap_or_else(|| model.clone()),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}
