//! Ollama backend against a mock HTTP server.
//!
//! Verifies request shape and that HTTP failures map onto the enrichment
//! error kinds the job handlers branch on.

#![cfg(feature = "ollama")]

use std::time::Duration;

use docket_inference::{EnrichmentBackend, Error, Language, OllamaConfig, OllamaEnrichmentBackend};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend_for(server: &MockServer) -> OllamaEnrichmentBackend {
    OllamaEnrichmentBackend::new(OllamaConfig {
        base_url: server.uri(),
        gen_model: "test-gen".to_string(),
        gen_timeout: Duration::from_secs(5),
    })
    .expect("Failed to create backend")
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({
        "model": "test-gen",
        "message": {"role": "assistant", "content": content},
        "done": true
    })
}

#[tokio::test]
async fn test_summarize_posts_chat_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"model": "test-gen", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("  A short summary.  ")))
        .expect(1)
        .mount(&server)
        .await;

    let summary = backend_for(&server).summarize("Long text").await.unwrap();
    assert_eq!(summary, "A short summary.");
}

#[tokio::test]
async fn test_rate_limit_maps_to_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = backend_for(&server).summarize("text").await.unwrap_err();
    assert!(matches!(err, Error::RateLimited(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_server_error_maps_to_enrichment_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .translate("text", Language::Arabic)
        .await
        .unwrap_err();
    match err {
        Error::EnrichmentFailed(msg) => assert!(msg.contains("model crashed")),
        other => panic!("expected EnrichmentFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend_for(&server).summarize("text").await.unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)));
}

#[tokio::test]
async fn test_timeline_parses_fenced_json_and_sorts() {
    let server = MockServer::start().await;
    let content = "```json\n{\"events\": [\
        {\"date\": \"2023-06-01\", \"description\": \"Judgment\"},\
        {\"date\": \"2022-01-15\", \"description\": \"Claim filed\"}\
    ]}\n```";
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({"format": "json"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(content)))
        .mount(&server)
        .await;

    let events = backend_for(&server)
        .extract_timeline("Claim filed 2022-01-15. Judgment 2023-06-01.")
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].description, "Claim filed");
    assert_eq!(events[1].date, "2023-06-01");
    assert_eq!(events[0].source_type, "document");
}

#[tokio::test]
async fn test_timeline_prose_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(chat_reply("There are no dates here.")),
        )
        .mount(&server)
        .await;

    let err = backend_for(&server)
        .extract_timeline("text")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidResponse(_)));
}

#[tokio::test]
async fn test_long_summary_is_map_reduced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("partial")))
        .expect(3)
        .mount(&server)
        .await;

    let backend = backend_for(&server).with_chunking(8, 8);
    let summary = backend.summarize("first\nsecond").await.unwrap();
    assert_eq!(summary, "partial");
}

#[tokio::test]
async fn test_translation_covers_every_chunk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("part")))
        .expect(5)
        .mount(&server)
        .await;

    let backend = backend_for(&server).with_chunking(10, 2);
    let translated = backend
        .translate(&"abcdefghij".repeat(5), Language::Arabic)
        .await
        .unwrap();
    assert_eq!(translated.lines().count(), 5);
}

#[tokio::test]
async fn test_summary_combines_in_rounds() {
    let server = MockServer::start().await;
    // Five chunk summaries, then 2 + 1 + 1 combine calls.
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("partial")))
        .expect(9)
        .mount(&server)
        .await;

    let backend = backend_for(&server).with_chunking(10, 2);
    let summary = backend.summarize(&"abcdefghij".repeat(5)).await.unwrap();
    assert_eq!(summary, "partial");
}

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": []})))
        .mount(&server)
        .await;

    assert!(backend_for(&server).health_check().await.unwrap());
}

#[tokio::test]
async fn test_health_check_unreachable_is_false() {
    let backend = OllamaEnrichmentBackend::new(OllamaConfig {
        base_url: "http://127.0.0.1:9".to_string(),
        gen_model: "test-gen".to_string(),
        gen_timeout: Duration::from_secs(1),
    })
    .unwrap();
    assert!(!backend.health_check().await.unwrap());
}
