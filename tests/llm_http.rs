//! HTTP seams against a mock server: the OpenAI-compatible LLM client and
//! the embeddings provider.

use futures_util::StreamExt;
use httpmock::prelude::*;

use mindloom::config::{EmbeddingConfig, LlmConfig};
use mindloom::embedding::{EmbeddingProvider, HttpEmbeddingProvider};
use mindloom::llm::{GenerationOptions, HttpLlmClient, LlmClient, Message};

fn llm_config(base_url: String) -> LlmConfig {
    LlmConfig {
        base_url,
        api_key: "test-key".into(),
        model: "test-model".into(),
        ..LlmConfig::default()
    }
}

#[tokio::test]
async fn generate_parses_content_and_usage() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .header("authorization", "Bearer test-key")
            .json_body_partial(r#"{"model": "test-model", "stream": false}"#);
        then.status(200).json_body(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello there."}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }));
    });

    let client = HttpLlmClient::new(&llm_config(server.url("/v1"))).unwrap();
    let (text, usage) = client
        .generate(&[Message::user("hi")], &GenerationOptions::default())
        .await
        .unwrap();

    mock.assert();
    assert_eq!(text, "Hello there.");
    assert_eq!(usage.prompt_tokens, 12);
    assert_eq!(usage.completion_tokens, 3);
    assert_eq!(usage.total_tokens, 15);
}

#[tokio::test]
async fn generate_surfaces_upstream_errors() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/chat/completions");
        then.status(429).body("rate limit exceeded");
    });

    let client = HttpLlmClient::new(&llm_config(server.url("/v1"))).unwrap();
    let result = client
        .generate(&[Message::user("hi")], &GenerationOptions::default())
        .await;

    let err = result.unwrap_err();
    assert!(err.to_string().contains("429"));
}

#[tokio::test]
async fn stream_yields_deltas_in_order() {
    let server = MockServer::start();
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"world\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    server.mock(|when, then| {
        when.method(POST)
            .path("/v1/chat/completions")
            .json_body_partial(r#"{"stream": true}"#);
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(body);
    });

    let client = HttpLlmClient::new(&llm_config(server.url("/v1"))).unwrap();
    let mut stream = client
        .stream(&[Message::user("hi")], &GenerationOptions::default())
        .await
        .unwrap();

    let mut out = String::new();
    while let Some(delta) = stream.next().await {
        out.push_str(&delta.unwrap());
    }
    assert_eq!(out, "Hello world");
}

#[tokio::test]
async fn embeddings_are_fetched_and_reordered() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/embeddings");
        // Deliberately out of order; the provider must sort by index.
        then.status(200).json_body(serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0, 0.0]},
                {"index": 0, "embedding": [1.0, 0.0, 0.0]}
            ]
        }));
    });

    let config = EmbeddingConfig {
        base_url: server.url("/v1"),
        dimensions: 3,
        normalize: false,
        ..EmbeddingConfig::default()
    };
    let provider = HttpEmbeddingProvider::new(&config).unwrap();
    let vectors = provider
        .embed(&["first".to_string(), "second".to_string()])
        .await
        .unwrap();

    assert_eq!(vectors[0], vec![1.0, 0.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0, 0.0]);
}

#[tokio::test]
async fn embedding_dimension_mismatch_is_an_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/v1/embeddings");
        then.status(200).json_body(serde_json::json!({
            "data": [{"index": 0, "embedding": [1.0, 2.0]}]
        }));
    });

    let config = EmbeddingConfig {
        base_url: server.url("/v1"),
        dimensions: 3,
        ..EmbeddingConfig::default()
    };
    let provider = HttpEmbeddingProvider::new(&config).unwrap();
    let result = provider.embed(&["text".to_string()]).await;
    assert!(result.is_err());
}
