//! Retrieval gate: decides whether a turn needs external documents.

use crate::brain::LlmProvider;
use crate::config::GateConfig;
use crate::error::{IsbotError, PipelineError};
use crate::prompt::PromptComposer;
use crate::types::{CompletionRequest, Conversation};
use std::sync::Arc;
use tracing::debug;

/// Outcome of the gate classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Answer from the conversation alone.
    Answer,
    /// Retrieve documents before answering.
    Retrieve,
}

impl Decision {
    pub fn needs_retrieval(self) -> bool {
        matches!(self, Decision::Retrieve)
    }
}

/// Classify a gate reply.
///
/// Anything containing `RETRIEVE` (any case) retrieves; every other reply,
/// including empty or malformed ones, answers directly.
pub fn classify_decision(reply: &str) -> Decision {
    if reply.to_uppercase().contains("RETRIEVE") {
        Decision::Retrieve
    } else {
        Decision::Answer
    }
}

pub struct RetrievalGate {
    provider: Arc<dyn LlmProvider>,
    composer: PromptComposer,
    config: GateConfig,
}

impl RetrievalGate {
    pub fn new(provider: Arc<dyn LlmProvider>, composer: PromptComposer, config: GateConfig) -> Self {
        Self {
            provider,
            composer,
            config,
        }
    }

    /// Ask the backend whether `conversation` needs retrieval.
    ///
    /// Makes exactly one deterministic, non-streaming call. Backend failures
    /// are returned to the caller unchanged.
    pub async fn decide(&self, conversation: &Conversation) -> Result<bool, IsbotError> {
        Ok(self.classify(conversation).await?.needs_retrieval())
    }

    pub async fn classify(&self, conversation: &Conversation) -> Result<Decision, IsbotError> {
        if conversation.last_user_message().is_none() {
            return Err(PipelineError::NoUserMessage.into());
        }
        let request = CompletionRequest::deterministic(
            self.composer.build_decision_prompt(conversation),
        )
        .with_max_tokens(self.config.max_tokens);
        let response = self.provider.complete(request).await?;
        let decision = classify_decision(&response.text);
        debug!(
            reply = response.text.as_str(),
            decision = ?decision,
            "Retrieval gate decided"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::LlmError;
    use crate::prompt::DEFAULT_DECISION_PROMPT;
    use crate::types::Message;

    fn gate(provider: Arc<MockLlmProvider>) -> RetrievalGate {
        RetrievalGate::new(provider, PromptComposer::default(), GateConfig::default())
    }

    fn conversation() -> Conversation {
        Conversation::new(vec![Message::user("Jak si zapíšu předmět?")]).unwrap()
    }

    #[test]
    fn test_classify_decision_variants() {
        assert_eq!(classify_decision("RETRIEVE"), Decision::Retrieve);
        assert_eq!(classify_decision("retrieve"), Decision::Retrieve);
        assert_eq!(classify_decision("I think we should Retrieve."), Decision::Retrieve);
        assert_eq!(classify_decision("ANSWER"), Decision::Answer);
        assert_eq!(classify_decision(""), Decision::Answer);
        assert_eq!(classify_decision("maybe? not sure"), Decision::Answer);
        assert_eq!(classify_decision("RETRIEV"), Decision::Answer);
    }

    #[tokio::test]
    async fn test_decide_retrieve() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("RETRIEVE");
        assert!(gate(provider.clone()).decide(&conversation()).await.unwrap());

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].temperature, Some(0.0));
        assert_eq!(requests[0].messages[0].content, DEFAULT_DECISION_PROMPT);
        assert_eq!(requests[0].messages[1], Message::user("Jak si zapíšu předmět?"));
    }

    #[tokio::test]
    async fn test_decide_malformed_reply_answers_directly() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("<think>hmm</think> Sure, here is the answer");
        assert!(!gate(provider).decide(&conversation()).await.unwrap());
    }

    #[tokio::test]
    async fn test_decide_propagates_backend_failure() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::Connection {
            message: "connection refused".into(),
        });
        let err = gate(provider).decide(&conversation()).await.unwrap_err();
        assert!(matches!(err, IsbotError::Llm(LlmError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_decide_requires_user_message() {
        let provider = Arc::new(MockLlmProvider::new());
        let empty = Conversation::new(vec![Message::system("s")]).unwrap();
        let err = gate(provider.clone()).decide(&empty).await.unwrap_err();
        assert!(matches!(
            err,
            IsbotError::Pipeline(PipelineError::NoUserMessage)
        ));
        assert_eq!(provider.call_count(), 0);
    }
}
