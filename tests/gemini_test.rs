//! Wire-level tests for `GeminiClient` against a mock server.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use warmpath::reasoning::{GeminiClient, ReasoningService};
use warmpath::WarmpathError;

fn candidate_body(parts: &[&str]) -> serde_json::Value {
    let parts: Vec<_> = parts.iter().map(|t| json!({ "text": t })).collect();
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": parts },
            "finishReason": "STOP"
        }]
    })
}

#[tokio::test]
async fn sends_prompt_and_joins_parts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-pro:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "contents": [{ "parts": [{ "text": "hello" }] }]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(candidate_body(&["{\"ttl_seconds\": ", "120}"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url("test-key", server.uri());
    let text = client.generate("hello").await.unwrap();
    assert_eq!(text, "{\"ttl_seconds\": 120}");
}

#[tokio::test]
async fn custom_model_changes_path() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body(&["ok"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url("k", format!("{}/", server.uri())).model("gemini-1.5-flash");
    assert_eq!(client.model_name(), "gemini-1.5-flash");
    assert_eq!(client.generate("x").await.unwrap(), "ok");
}

#[tokio::test]
async fn rate_limit_maps_to_rate_limited() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "12"))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url("k", server.uri());
    let err = client.generate("x").await.unwrap_err();
    assert!(matches!(err, WarmpathError::RateLimited { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
}

#[tokio::test]
async fn server_error_maps_to_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url("k", server.uri());
    match client.generate("x").await {
        Err(WarmpathError::Api { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn no_candidates_is_empty_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url("k", server.uri());
    assert!(matches!(
        client.generate("x").await,
        Err(WarmpathError::EmptyResponse)
    ));
}

#[tokio::test]
async fn malformed_body_is_http_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = GeminiClient::with_base_url("k", server.uri());
    assert!(matches!(client.generate("x").await, Err(WarmpathError::Http(_))));
}
