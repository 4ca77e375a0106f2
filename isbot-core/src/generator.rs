//! Final answer generation, batched or streamed.

use crate::brain::{LlmProvider, TextStream};
use crate::error::LlmError;
use crate::types::{CompletionRequest, Message};
use std::sync::Arc;
use tracing::debug;

/// Output of the answer generator.
pub enum Generated {
    Text(String),
    Stream(TextStream),
}

impl std::fmt::Debug for Generated {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Generated::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Generated::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Issues the final request to the backend.
pub struct AnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
}

impl AnswerGenerator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        temperature: Option<f32>,
        max_tokens: Option<usize>,
    ) -> Self {
        Self {
            provider,
            temperature,
            max_tokens,
        }
    }

    /// Generate an answer for `messages`.
    ///
    /// With `stream`, the returned fragments are pulled lazily from the
    /// backend; a non-success response status fails this call instead.
    pub async fn generate(
        &self,
        messages: Vec<Message>,
        stream: bool,
        parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Generated, LlmError> {
        let request = CompletionRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            model: None,
            parameters,
        };
        debug!(
            messages = request.messages.len(),
            stream,
            model = self.provider.model_name(),
            "Generating answer"
        );
        if stream {
            Ok(Generated::Stream(
                self.provider.complete_stream(request).await?,
            ))
        } else {
            Ok(Generated::Text(self.provider.complete(request).await?.text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::{MockLlmProvider, collect_stream};
    use serde_json::json;

    #[tokio::test]
    async fn test_generate_text() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("Odpověď");
        let generator = AnswerGenerator::new(provider.clone(), None, Some(1024));
        let mut parameters = serde_json::Map::new();
        parameters.insert("top_p".into(), json!(0.8));

        let generated = generator
            .generate(vec![Message::user("q")], false, parameters)
            .await
            .unwrap();
        assert!(matches!(generated, Generated::Text(ref t) if t == "Odpověď"));

        let request = &provider.requests()[0];
        assert_eq!(request.max_tokens, Some(1024));
        assert_eq!(request.temperature, None);
        assert_eq!(request.parameters["top_p"], json!(0.8));
    }

    #[tokio::test]
    async fn test_generate_stream() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("jedna dva tři");
        let generator = AnswerGenerator::new(provider, None, None);
        let Generated::Stream(stream) = generator
            .generate(vec![Message::user("q")], true, Default::default())
            .await
            .unwrap()
        else {
            panic!("expected a stream");
        };
        assert_eq!(collect_stream(stream).await.unwrap(), "jedna dva tři");
    }

    #[tokio::test]
    async fn test_generate_failure_is_immediate() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::ApiRequest {
            message: "HTTP 500".into(),
        });
        let generator = AnswerGenerator::new(provider, None, None);
        assert!(
            generator
                .generate(vec![Message::user("q")], true, Default::default())
                .await
                .is_err()
        );
    }
}
