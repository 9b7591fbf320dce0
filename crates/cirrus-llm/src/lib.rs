//! Text-completion backends for Cirrus agents.
//!
//! Every backend implements [`cirrus_core::CompletionService`]. Use
//! [`build_completion`] to turn a [`ModelConfig`] into a ready service; it
//! wraps the primary backend and any fallbacks in a [`FailoverCompletion`]
//! when a retry policy or fallback models are configured.

/// Provider and model configuration.
pub mod config;
/// Retry and failover across backends.
pub mod failover;
/// OpenAI-compatible chat-completions backend.
pub mod openai;
/// Offline scripted and echo backends.
pub mod static_backend;

pub use config::{LlmProvider, ModelConfig};
pub use failover::{FailoverCompletion, RetryPolicy};
pub use openai::OpenAiCompletion;
pub use static_backend::StaticCompletion;

use cirrus_core::{CirrusResult, CompletionService};
use std::sync::Arc;

fn single_backend(config: &ModelConfig) -> Arc<dyn CompletionService> {
    match config.provider {
        LlmProvider::Static => Arc::new(StaticCompletion::echo()),
        LlmProvider::OpenAi | LlmProvider::OpenRouter | LlmProvider::Groq | LlmProvider::Ollama => {
            Arc::new(OpenAiCompletion::new(config.clone()))
        }
    }
}

/// Build the completion service described by `config`.
///
/// Without fallbacks or a retry policy the primary backend is returned as is.
pub fn build_completion(config: &ModelConfig) -> CirrusResult<Arc<dyn CompletionService>> {
    if config.fallback_models.is_empty() && config.retry_policy.is_none() {
        return Ok(single_backend(config));
    }

    let backends: Vec<Arc<dyn CompletionService>> = std::iter::once(config)
        .chain(config.fallback_models.iter())
        .map(single_backend)
        .collect();
    let policy = config.retry_policy.clone().unwrap_or_default();
    Ok(Arc::new(FailoverCompletion::new(backends, policy)?))
}
