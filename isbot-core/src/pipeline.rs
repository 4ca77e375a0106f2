//! The turn handler: gate, augment, retrieve, compose, generate, record.
//!
//! [`RagPipeline`] owns one instance of every stage and runs them strictly in
//! sequence per turn. It holds no per-turn mutable state, so a single
//! pipeline can be shared behind an `Arc` by any number of concurrent turns.

use crate::augment::QueryAugmenter;
use crate::brain::{LlmProvider, TextStream, collect_stream};
use crate::config::IsbotConfig;
use crate::context::assemble;
use crate::error::{LlmError, PipelineError, Result};
use crate::feedback::feedback_link;
use crate::gate::RetrievalGate;
use crate::generator::{AnswerGenerator, Generated};
use crate::index::{VectorIndex, create_index};
use crate::prompt::PromptComposer;
use crate::providers::create_provider;
use crate::recorder::{SessionRecord, SessionRecorder, format_timestamp};
use crate::retriever::DedupRetriever;
use crate::types::{Conversation, Message, Passage};
use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tracing::{error, info, warn};

/// Per-request generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnOptions {
    /// Stream the answer. `None` uses `llm.use_streaming`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Extra backend parameters (`top_p`, `seed`, ...).
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

/// One user turn: the new query plus the prior conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub query: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub options: TurnOptions,
}

impl TurnRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.options.stream = Some(stream);
        self
    }
}

/// The user-visible answer.
pub enum Answer {
    Text(String),
    Stream(TextStream),
    /// A failed turn, already formatted as `"Error: ..."`.
    Error(String),
}

impl Answer {
    pub fn is_error(&self) -> bool {
        matches!(self, Answer::Error(_))
    }

    /// Drain the answer into one string. Error answers yield their message.
    pub async fn into_text(self) -> std::result::Result<String, LlmError> {
        match self {
            Answer::Text(text) | Answer::Error(text) => Ok(text),
            Answer::Stream(stream) => collect_stream(stream).await,
        }
    }
}

impl std::fmt::Debug for Answer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Answer::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Answer::Stream(_) => f.write_str("Stream(..)"),
            Answer::Error(message) => f.debug_tuple("Error").field(message).finish(),
        }
    }
}

/// What a turn did on the way to its answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnTrace {
    /// Whether the gate asked for documents.
    pub retrieved: bool,
    /// Queries sent to the index, original last.
    pub queries: Vec<String>,
    pub passages: Vec<Passage>,
    pub context: String,
    /// Session artifact written for a non-streamed answer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_path: Option<PathBuf>,
}

#[derive(Debug)]
pub struct TurnResponse {
    pub answer: Answer,
    /// Session timestamp (`YYYY-MM-DD-HH-MM-SS`).
    pub timestamp: String,
    pub feedback_link: Option<String>,
    pub trace: TurnTrace,
}

pub struct RagPipeline {
    config: IsbotConfig,
    composer: PromptComposer,
    gate: RetrievalGate,
    augmenter: QueryAugmenter,
    retriever: DedupRetriever,
    generator: AnswerGenerator,
    recorder: Option<SessionRecorder>,
}

impl RagPipeline {
    pub fn new(
        config: IsbotConfig,
        provider: Arc<dyn LlmProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        config.check()?;
        for warning in config.validate() {
            warn!("{}", warning);
        }

        let composer = PromptComposer::new(config.prompts.clone());
        let gate = RetrievalGate::new(provider.clone(), composer.clone(), config.gate.clone());
        let augmenter =
            QueryAugmenter::new(provider.clone(), composer.clone(), config.augment.clone());
        let retriever = DedupRetriever::new(index, config.retrieval.top_k)?
            .concurrent(config.retrieval.concurrent);
        let generator =
            AnswerGenerator::new(provider, config.llm.temperature, config.llm.max_tokens);
        let recorder = SessionRecorder::from_config(&config.recorder);

        Ok(Self {
            config,
            composer,
            gate,
            augmenter,
            retriever,
            generator,
            recorder,
        })
    }

    /// Build the provider and index named in `config`.
    pub fn from_config(config: IsbotConfig) -> Result<Self> {
        config.check()?;
        let provider = create_provider(&config.llm)?;
        let index = create_index(&config.index)?;
        Self::new(config, provider, index)
    }

    pub fn config(&self) -> &IsbotConfig {
        &self.config
    }

    /// The conversation a turn works on: history, the new query, and the
    /// configured system prompt at index 0.
    pub fn build_conversation(
        &self,
        request: &TurnRequest,
    ) -> std::result::Result<Conversation, PipelineError> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(PipelineError::EmptyQuery);
        }
        let mut conversation = Conversation::new(request.history.clone())?;
        conversation.push_user(query);
        conversation.set_system_prompt(&self.config.prompts.system_prompt);
        Ok(conversation)
    }

    /// Run one turn, returning any failure to the caller.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        self.run_turn_at(request, Local::now()).await
    }

    /// Run one turn; failures become an [`Answer::Error`] message.
    pub async fn handle_turn(&self, request: TurnRequest) -> TurnResponse {
        let started = Local::now();
        match self.run_turn_at(request, started).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Turn failed");
                TurnResponse {
                    answer: Answer::Error(format!("Error: {}", e)),
                    timestamp: format_timestamp(&started),
                    feedback_link: None,
                    trace: TurnTrace::default(),
                }
            }
        }
    }

    async fn run_turn_at(
        &self,
        request: TurnRequest,
        started: DateTime<Local>,
    ) -> Result<TurnResponse> {
        let conversation = self.build_conversation(&request)?;
        let query = request.query.trim().to_string();
        let timestamp = format_timestamp(&started);

        let retrieve = if self.config.gate.enabled {
            self.gate.decide(&conversation).await?
        } else {
            true
        };

        let mut trace = TurnTrace {
            retrieved: retrieve,
            ..TurnTrace::default()
        };
        let messages = if retrieve {
            let standalone = self.augmenter.standalone_query(&conversation).await?;
            let queries = self.augmenter.augment(&standalone).await;
            let passages = match self.retriever.retrieve(&queries).await {
                Ok(passages) => passages,
                Err(e) if self.config.retrieval.degrade_on_index_error => {
                    warn!(error = %e, "Index unavailable; answering without documents");
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            };
            trace.context = assemble(&passages);
            trace.queries = queries.texts();
            trace.passages = passages;
            self.composer
                .build_generation_prompt(&conversation, Some(&trace.context))
        } else {
            self.composer.build_generation_prompt(&conversation, None)
        };

        info!(
            retrieved = trace.retrieved,
            queries = trace.queries.len(),
            passages = trace.passages.len(),
            "Generating answer"
        );

        let stream = request
            .options
            .stream
            .unwrap_or(self.config.llm.use_streaming);
        let generated = self
            .generator
            .generate(messages, stream, request.options.parameters)
            .await?;

        let record = self.recorder.as_ref().map(|recorder| {
            (
                recorder.clone(),
                SessionRecord {
                    timestamp: started,
                    original_query: query,
                    augmented_queries: trace.queries.clone(),
                    retrieved_context: trace.context.clone(),
                    answer: String::new(),
                },
            )
        });

        let answer = match generated {
            Generated::Text(text) => {
                if let Some((recorder, mut record)) = record {
                    record.answer = text.clone();
                    trace.record_path = recorder.record_best_effort(&record).await;
                }
                Answer::Text(text)
            }
            Generated::Stream(stream) => match record {
                Some(pending) => Answer::Stream(RecordingStream::new(stream, pending).boxed()),
                None => Answer::Stream(stream),
            },
        };

        // A same-second collision suffixes the artifact name; link to that.
        let session = trace
            .record_path
            .as_deref()
            .and_then(|path| path.file_name())
            .and_then(|name| name.to_str())
            .unwrap_or(&timestamp);
        let feedback_link = self
            .config
            .feedback
            .url_template
            .as_deref()
            .map(|template| feedback_link(template, session));

        Ok(TurnResponse {
            answer,
            timestamp,
            feedback_link,
            trace,
        })
    }
}

pin_project! {
    /// Passes fragments through and, once the inner stream ends, writes the
    /// session record before reporting the end. Dropped or failed streams are
    /// not recorded.
    struct RecordingStream {
        #[pin]
        inner: TextStream,
        answer: String,
        pending: Option<(SessionRecorder, SessionRecord)>,
        writing: Option<BoxFuture<'static, Option<PathBuf>>>,
        finished: bool,
    }
}

impl RecordingStream {
    fn new(inner: TextStream, pending: (SessionRecorder, SessionRecord)) -> Self {
        Self {
            inner,
            answer: String::new(),
            pending: Some(pending),
            writing: None,
            finished: false,
        }
    }
}

impl Stream for RecordingStream {
    type Item = std::result::Result<String, LlmError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }
        if let Some(writing) = this.writing.as_mut() {
            ready!(writing.as_mut().poll(cx));
            *this.writing = None;
            *this.finished = true;
            return Poll::Ready(None);
        }
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(fragment)) => {
                this.answer.push_str(&fragment);
                Poll::Ready(Some(Ok(fragment)))
            }
            Some(Err(e)) => {
                *this.pending = None;
                Poll::Ready(Some(Err(e)))
            }
            None => {
                let Some((recorder, mut record)) = this.pending.take() else {
                    *this.finished = true;
                    return Poll::Ready(None);
                };
                record.answer = std::mem::take(this.answer);
                let mut writing =
                    async move { recorder.record_best_effort(&record).await }.boxed();
                if writing.as_mut().poll(cx).is_pending() {
                    *this.writing = Some(writing);
                    return Poll::Pending;
                }
                *this.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::error::IsbotError;
    use crate::index::StaticIndex;
    use crate::types::Role;
    use pretty_assertions::assert_eq;

    fn config() -> IsbotConfig {
        let mut config = IsbotConfig::default();
        config.recorder.enabled = false;
        config.llm.use_streaming = false;
        config
    }

    fn pipeline(provider: Arc<MockLlmProvider>, index: Arc<StaticIndex>) -> RagPipeline {
        RagPipeline::new(config(), provider, index).unwrap()
    }

    #[test]
    fn test_build_conversation_sets_system_prompt() {
        let pipeline = pipeline(
            Arc::new(MockLlmProvider::new()),
            Arc::new(StaticIndex::new()),
        );
        let request = TurnRequest::new("  druhá otázka ").with_history(vec![
            Message::user("první"),
            Message::assistant("odpověď"),
        ]);
        let conversation = pipeline.build_conversation(&request).unwrap();
        assert_eq!(conversation.len(), 4);
        assert_eq!(conversation.messages()[0].role, Role::System);
        assert_eq!(conversation.last_user_message(), Some("druhá otázka"));
    }

    #[test]
    fn test_build_conversation_rejects_empty_query() {
        let pipeline = pipeline(
            Arc::new(MockLlmProvider::new()),
            Arc::new(StaticIndex::new()),
        );
        assert!(matches!(
            pipeline.build_conversation(&TurnRequest::new("   ")),
            Err(PipelineError::EmptyQuery)
        ));
    }

    #[test]
    fn test_new_rejects_zero_top_k() {
        let mut config = config();
        config.retrieval.top_k = 0;
        let result = RagPipeline::new(
            config,
            Arc::new(MockLlmProvider::new()),
            Arc::new(StaticIndex::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_answer_path_skips_index() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("ANSWER");
        provider.queue_text("Dobrý den!");
        let index = Arc::new(StaticIndex::new());
        let response = pipeline(provider.clone(), index.clone())
            .run_turn(TurnRequest::new("Ahoj"))
            .await
            .unwrap();
        assert_eq!(response.answer.into_text().await.unwrap(), "Dobrý den!");
        assert!(!response.trace.retrieved);
        assert_eq!(index.call_count(), 0);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_handle_turn_formats_errors() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_error(LlmError::Connection {
            message: "connection refused".into(),
        });
        let response = pipeline(provider, Arc::new(StaticIndex::new()))
            .handle_turn(TurnRequest::new("q"))
            .await;
        assert!(response.answer.is_error());
        let text = response.answer.into_text().await.unwrap();
        assert!(text.starts_with("Error: "));
        assert!(text.contains("connection refused"));
        assert!(response.feedback_link.is_none());
    }

    #[tokio::test]
    async fn test_index_failure_degrades_when_configured() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("RETRIEVE");
        provider.queue_text("[]");
        provider.queue_text("Nevím.");
        let mut config = config();
        config.retrieval.degrade_on_index_error = true;
        let pipeline = RagPipeline::new(
            config,
            provider.clone(),
            Arc::new(StaticIndex::failing("down")),
        )
        .unwrap();
        let response = pipeline.run_turn(TurnRequest::new("q")).await.unwrap();
        assert_eq!(response.answer.into_text().await.unwrap(), "Nevím.");
        assert!(response.trace.passages.is_empty());

        let generation = &provider.requests()[2];
        assert_eq!(generation.messages[1].role, Role::System);
    }

    #[tokio::test]
    async fn test_index_failure_fails_turn_by_default() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("RETRIEVE");
        provider.queue_text("[]");
        let pipeline = pipeline(provider, Arc::new(StaticIndex::failing("down")));
        let err = pipeline.run_turn(TurnRequest::new("q")).await.unwrap_err();
        assert!(matches!(err, IsbotError::Index(_)));
    }

    #[tokio::test]
    async fn test_feedback_link_uses_timestamp() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.queue_text("ANSWER");
        provider.queue_text("ok");
        let mut config = config();
        config.feedback.url_template = Some("https://f.example.com/?t={timestamp}".into());
        let pipeline =
            RagPipeline::new(config, provider, Arc::new(StaticIndex::new())).unwrap();
        let response = pipeline.run_turn(TurnRequest::new("q")).await.unwrap();
        assert_eq!(
            response.feedback_link.unwrap(),
            format!("https://f.example.com/?t={}", response.timestamp)
        );
        assert_eq!(response.timestamp.len(), "2025-01-01-00-00-00".len());
    }

    #[tokio::test]
    async fn test_feedback_link_follows_suffixed_artifact() {
        let logs = tempfile::TempDir::new().unwrap();
        let provider = Arc::new(MockLlmProvider::new());
        for answer in ["první", "druhá"] {
            provider.queue_text("ANSWER");
            provider.queue_text(answer);
        }
        let mut config = config();
        config.recorder.enabled = true;
        config.recorder.directory = logs.path().to_path_buf();
        config.feedback.url_template = Some("https://f.example.com/?t={timestamp}".into());
        let pipeline =
            RagPipeline::new(config, provider, Arc::new(StaticIndex::new())).unwrap();

        let started = Local::now();
        let first = pipeline
            .run_turn_at(TurnRequest::new("q"), started)
            .await
            .unwrap();
        let second = pipeline
            .run_turn_at(TurnRequest::new("q"), started)
            .await
            .unwrap();

        assert_eq!(first.timestamp, second.timestamp);
        assert_eq!(
            first.feedback_link.unwrap(),
            format!("https://f.example.com/?t={}", first.timestamp)
        );
        assert_eq!(
            second.feedback_link.unwrap(),
            format!("https://f.example.com/?t={}-1", second.timestamp)
        );
        assert!(logs.path().join(format!("{}-1", second.timestamp)).exists());
    }
}
