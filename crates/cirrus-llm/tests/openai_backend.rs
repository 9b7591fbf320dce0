#![allow(clippy::unwrap_used, clippy::expect_used)]

use cirrus_core::{AgentContext, CirrusError, CompletionService};
use cirrus_llm::{LlmProvider, ModelConfig, OpenAiCompletion};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, api_key: &str) -> ModelConfig {
    let mut config = ModelConfig::new(LlmProvider::OpenAi, "gpt-4o-mini");
    config.api_base_url = Some(server.uri());
    config.api_key = api_key.to_string();
    config
}

// ---------------------------------------------------------------------------
// 1. Successful completion returns the first choice's content
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "[{\"kind\":\"message\"}]"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = OpenAiCompletion::new(config_for(&server, "sk-test"));
    let text = backend
        .generate("plan a deployment", &AgentContext::default())
        .await
        .unwrap();
    assert_eq!(text, "[{\"kind\":\"message\"}]");
}

// ---------------------------------------------------------------------------
// 2. Non-2xx responses surface as HTTP errors carrying the status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let backend = OpenAiCompletion::new(config_for(&server, ""));
    let err = backend
        .generate("plan", &AgentContext::default())
        .await
        .unwrap_err();
    match err {
        CirrusError::Http(msg) => {
            assert!(msg.contains("503"), "got: {msg}");
            assert!(msg.contains("overloaded"));
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// 3. A body without choices is a completion error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_choices_is_completion_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let backend = OpenAiCompletion::new(config_for(&server, ""));
    let err = backend
        .generate("plan", &AgentContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CirrusError::Completion(_)));
}
