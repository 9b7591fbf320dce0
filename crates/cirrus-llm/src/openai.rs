use crate::config::{LlmProvider, ModelConfig};
use async_trait::async_trait;
use cirrus_core::{AgentContext, CirrusError, CirrusResult, CompletionService};
use tracing::debug;

/// OpenAI-compatible chat-completions backend.
///
/// Works with OpenAI, OpenRouter, Groq, Ollama, and any other provider
/// that implements the OpenAI chat completions API.
pub struct OpenAiCompletion {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiCompletion {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn system_prompt(context: &AgentContext) -> String {
        format!(
            "You are an infrastructure planning assistant. Environment: {}. Dry run: {}. \
             When asked for a plan, answer with a JSON array of steps, each with \
             kind, name, description and optional tool, args, content.",
            context.environment, context.dry_run
        )
    }

    fn build_body(&self, prompt: &str, context: &AgentContext) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "user": context.user_id,
            "messages": [
                {"role": "system", "content": Self::system_prompt(context)},
                {"role": "user", "content": prompt},
            ],
        })
    }

    fn add_provider_headers(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("Content-Type", "application/json");
        let request = if self.config.api_key.is_empty() {
            request
        } else {
            request.header("Authorization", format!("Bearer {}", self.config.api_key))
        };

        // OpenRouter requires extra headers
        if matches!(self.config.provider, LlmProvider::OpenRouter) {
            request
                .header("HTTP-Referer", "https://github.com/fboiero/Cirrus")
                .header("X-Title", "Cirrus")
        } else {
            request
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn generate(&self, prompt: &str, context: &AgentContext) -> CirrusResult<String> {
        let url = format!("{}/v1/chat/completions", self.config.base_url());
        let body = self.build_body(prompt, context);

        debug!(model = %self.config.model_id, prompt_len = prompt.len(), "Requesting completion");

        let resp = self
            .add_provider_headers(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| CirrusError::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| CirrusError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(CirrusError::Http(format!(
                "Completion API error {status}: {text}"
            )));
        }

        let resp_body: serde_json::Value = serde_json::from_str(&text)?;
        parse_completion_response(&resp_body)
    }
}

/// Extract the assistant text from an OpenAI-style response body.
pub fn parse_completion_response(body: &serde_json::Value) -> CirrusResult<String> {
    body["choices"]
        .get(0)
        .and_then(|choice| choice["message"]["content"].as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            CirrusError::Completion(format!("Completion response has no message content: {body}"))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_completion_response() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": "[]"}}]
        });
        assert_eq!(parse_completion_response(&body).unwrap(), "[]");
    }

    #[test]
    fn test_parse_completion_response_without_choices() {
        let err = parse_completion_response(&json!({"choices": []})).unwrap_err();
        assert!(matches!(err, CirrusError::Completion(_)));
    }

    #[test]
    fn test_body_carries_context() {
        let backend = OpenAiCompletion::new(ModelConfig::new(LlmProvider::OpenAi, "gpt-4o"));
        let ctx = AgentContext::for_user("alice").with_dry_run(false);
        let body = backend.build_body("plan it", &ctx);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["user"], "alice");
        assert_eq!(body["messages"][1]["content"], "plan it");
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("Dry run: false"));
    }
}
