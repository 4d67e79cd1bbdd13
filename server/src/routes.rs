//! HTTP routes and error mapping.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use replygen_retrieval::{EmbeddingError, RetrievalError};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::handler::{GenerateParams, GenerateResponse, HealthResponse, ReplyHandler};

const INDEX_HTML: &str = include_str!("index.html");

/// Build the application router.
pub fn router(handler: Arc<ReplyHandler>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/generate_response", post(generate_response))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(handler)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health(State(handler): State<Arc<ReplyHandler>>) -> Json<HealthResponse> {
    Json(handler.health())
}

async fn generate_response(
    State(handler): State<Arc<ReplyHandler>>,
    payload: Result<Json<GenerateParams>, JsonRejection>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let Json(params) = payload.map_err(|rejection| ApiError {
        status: StatusCode::BAD_REQUEST,
        message: rejection.body_text(),
    })?;
    let response = handler.generate(params).await?;
    Ok(Json(response))
}

/// Error returned to HTTP clients as `{ "error": message }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    /// Status code sent to the client.
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RetrievalError> for ApiError {
    fn from(err: RetrievalError) -> Self {
        let status = match &err {
            e if e.is_validation_error() => StatusCode::BAD_REQUEST,
            // A message with no embeddable content.
            RetrievalError::Embedding(EmbeddingError::DegenerateVector { .. }) => {
                StatusCode::BAD_REQUEST
            }
            e if e.is_provider_error() => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("Request failed: {err}");
        } else {
            warn!("Rejected request: {err}");
        }

        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
