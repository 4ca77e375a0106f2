//! Language-model provider abstraction and an in-process mock.
//!
//! Defines the `LlmProvider` trait for model-agnostic backend calls in both
//! batch and streaming mode, plus a scriptable mock used throughout the tests.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, TokenUsage};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use std::collections::VecDeque;
use std::sync::Mutex;

/// A finite, forward-only sequence of generated text fragments.
///
/// Dropping the stream before it ends cancels the underlying transport.
pub type TextStream = BoxStream<'static, Result<String, LlmError>>;

/// Trait for language-model backends, supporting both full and streaming completions.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Start a streaming completion.
    ///
    /// Transport failures and non-success status codes are reported here,
    /// before any fragment is produced.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// A scripted provider for tests and offline runs.
///
/// Replies are consumed in FIFO order; every request is recorded so tests
/// can assert on call counts and prompt contents.
pub struct MockLlmProvider {
    model: String,
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            replies: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a MockLlmProvider that always returns the given text.
    ///
    /// Queues multiple copies of the reply so it can handle multiple calls.
    pub fn with_response(text: &str) -> Self {
        let provider = Self::new();
        for _ in 0..20 {
            provider.queue_text(text);
        }
        provider
    }

    /// Queue a text reply for the next call.
    pub fn queue_text(&self, text: impl Into<String>) {
        self.lock_replies().push_back(Ok(text.into()));
    }

    /// Queue a failure for the next call.
    pub fn queue_error(&self, error: LlmError) {
        self.lock_replies().push_back(Err(error));
    }

    /// All requests received so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, LlmError>>> {
        self.replies.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_reply(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Ok("I'm a mock LLM. No queued responses available.".to_string()))
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let text = self.next_reply(request)?;
        Ok(Self::text_response(&text))
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError> {
        let text = self.next_reply(request)?;
        let fragments: Vec<Result<String, LlmError>> = text
            .split_inclusive(' ')
            .map(|word| Ok(word.to_string()))
            .collect();
        Ok(futures::stream::iter(fragments).boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Drain a text stream into a single string.
pub async fn collect_stream(mut stream: TextStream) -> Result<String, LlmError> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}
