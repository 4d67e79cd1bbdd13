//! End-to-end tests for the HTTP routes.
//!
//! Each test serves the router on an ephemeral port, backed by the offline
//! hashing embedder and a canned completion provider.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use replygen_embeddings::EmbeddingCache;
use replygen_retrieval::{
    CompletionProvider, CompletionRequest, CompletionResponse, HashingProvider, Record,
    ReplyConfig, ReplyEngine, RetrievalError,
};
use replygen_server::{GenerateResponse, ReplyHandler, router};
use serde_json::{Value, json};

enum Canned {
    Reply(&'static str),
    Outage,
}

#[async_trait]
impl CompletionProvider for Canned {
    fn name(&self) -> &str {
        "canned"
    }

    fn default_model(&self) -> &str {
        "canned-model"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> replygen_retrieval::Result<CompletionResponse> {
        match self {
            Canned::Reply(text) => Ok(CompletionResponse {
                text: format!("{text} [{} chars of prompt]", request.prompt.len()),
                model: "canned-model".to_string(),
            }),
            Canned::Outage => Err(RetrievalError::Completion(
                "API error 503 Service Unavailable".to_string(),
            )),
        }
    }
}

async fn spawn_server(completer: Canned) -> SocketAddr {
    let hashing = HashingProvider::new(256);
    let records = vec![
        Record::new(0, "battery dies fast", "Please DM us your order #", "Acme"),
        Record::new(1, "package never arrived", "Sorry! Which carrier?", "Shipco"),
    ];
    let pairs = records
        .into_iter()
        .map(|r| {
            let v = hashing.embed_text(&r.customer_message);
            (r, v)
        })
        .collect();
    let cache = EmbeddingCache::from_pairs("token-hash-v1", pairs).unwrap();
    let engine = ReplyEngine::from_cache(
        ReplyConfig::default(),
        cache,
        Arc::new(hashing),
        Arc::new(completer),
    )
    .unwrap();

    let app = router(Arc::new(ReplyHandler::new(Arc::new(engine))));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_generate_response() {
    let addr = spawn_server(Canned::Reply("So sorry!")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/generate_response"))
        .json(&json!({ "tweet": "my battery died", "company": "Acme" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: GenerateResponse = response.json().await.unwrap();
    assert!(body.response.starts_with("So sorry!"));
    assert_eq!(body.similar_tweet, "battery dies fast");
    assert_eq!(body.similar_response, "Please DM us your order #");
    assert!(body.similarity_score > 0.0);
    assert_eq!(body.company, "Acme");
}

#[tokio::test]
async fn test_missing_company_uses_default() {
    let addr = spawn_server(Canned::Reply("ok")).await;

    let body: Value = reqwest::Client::new()
        .post(format!("http://{addr}/generate_response"))
        .json(&json!({ "tweet": "package never came" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["company"], "Amazon");
    assert_eq!(body["similar_tweet"], "package never arrived");
}

#[tokio::test]
async fn test_oversized_k_is_clamped() {
    let addr = spawn_server(Canned::Reply("ok")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/generate_response"))
        .json(&json!({ "tweet": "my battery died", "k": 100_000 }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body: GenerateResponse = response.json().await.unwrap();
    assert_eq!(body.similar_tweet, "battery dies fast");
}

#[tokio::test]
async fn test_empty_tweet_is_bad_request() {
    let addr = spawn_server(Canned::Reply("ok")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/generate_response"))
        .json(&json!({ "tweet": "   " }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let addr = spawn_server(Canned::Reply("ok")).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/generate_response"))
        .header("content-type", "application/json")
        .body("{\"company\": \"Acme\"}")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_provider_outage_is_bad_gateway() {
    let addr = spawn_server(Canned::Outage).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/generate_response"))
        .json(&json!({ "tweet": "my battery died" }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("503"));
}

#[tokio::test]
async fn test_health_and_index_page() {
    let addr = spawn_server(Canned::Reply("ok")).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["records"], 2);
    assert_eq!(health["excluded_records"], 0);
    assert_eq!(health["embedding_model"], "token-hash-v1");

    let page = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(page.status(), reqwest::StatusCode::OK);
    assert!(page.text().await.unwrap().contains("/generate_response"));
}

#[tokio::test]
async fn test_cors_preflight_is_allowed() {
    let addr = spawn_server(Canned::Reply("ok")).await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("http://{addr}/generate_response"),
        )
        .header("origin", "http://example.test")
        .header("access-control-request-method", "POST")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}
