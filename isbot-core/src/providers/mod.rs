//! LLM provider implementations.
//!
//! Use `create_provider()` to instantiate the provider named in config:
//! - `openai` / `ollama`: any OpenAI-compatible chat completions endpoint
//! - `mock`: the in-process [`MockLlmProvider`] for offline runs

pub mod openai_compat;

use crate::brain::{LlmProvider, MockLlmProvider};
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;
use tracing::info;

pub use openai_compat::OpenAiCompatibleProvider;

/// Build the provider selected by `config.provider`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "openai" | "ollama" => {
            let provider = OpenAiCompatibleProvider::new(config)?;
            info!(
                base_url = provider.base_url(),
                model = %config.model,
                "Using OpenAI-compatible provider"
            );
            Ok(Arc::new(provider))
        }
        "mock" => Ok(Arc::new(MockLlmProvider::new())),
        other => Err(LlmError::ApiRequest {
            message: format!("Unknown LLM provider '{}'", other),
        }),
    }
}
