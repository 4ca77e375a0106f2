//! Core type definitions for ISbot.
//!
//! Defines the data structures that flow through the pipeline: chat messages
//! and conversations, retrieval queries, retrieved passages, and the request
//! and response shapes exchanged with the language-model backend.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for Role {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(PipelineError::UnknownRole {
                role: other.to_string(),
            }),
        }
    }
}

/// A single role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Build a message from an untyped role string, rejecting unknown roles.
    pub fn parse(role: &str, content: impl Into<String>) -> Result<Self, PipelineError> {
        Ok(Self::new(role.parse()?, content))
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}

/// The conversation transcript for one user turn.
///
/// Holds at most one system message, and only at index 0. The leading system
/// message may be set or replaced; every other message keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Build a conversation from an existing transcript.
    pub fn new(messages: Vec<Message>) -> Result<Self, PipelineError> {
        if let Some(index) = messages
            .iter()
            .enumerate()
            .skip(1)
            .find_map(|(i, m)| (m.role == Role::System).then_some(i))
        {
            return Err(PipelineError::MisplacedSystemMessage { index });
        }
        Ok(Self { messages })
    }

    /// Set the leading system message, replacing an existing one.
    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => first.content = prompt,
            _ => self.messages.insert(0, Message::system(prompt)),
        }
    }

    /// Consuming variant of [`Conversation::set_system_prompt`].
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.set_system_prompt(prompt);
        self
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Messages after the leading system message.
    pub fn turns(&self) -> &[Message] {
        match self.messages.first() {
            Some(first) if first.role == Role::System => &self.messages[1..],
            _ => &self.messages,
        }
    }

    /// Content of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn user_turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::User).count()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Whether a retrieval query is the user's own text or a model rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Original,
    Augmented,
}

/// A single query sent to the vector index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalQuery {
    pub text: String,
    pub kind: QueryKind,
}

impl RetrievalQuery {
    pub fn original(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: QueryKind::Original,
        }
    }

    pub fn augmented(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: QueryKind::Augmented,
        }
    }
}

/// Ordered set of retrieval queries.
///
/// Augmented queries keep generation order and the original query is always
/// the last member, so the set is never empty. Texts are unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySet {
    queries: Vec<RetrievalQuery>,
}

impl QuerySet {
    /// A set holding only the original query.
    pub fn original_only(original: impl Into<String>) -> Self {
        Self {
            queries: vec![RetrievalQuery::original(original)],
        }
    }

    /// Build a set from model rewrites followed by the original query.
    ///
    /// Blank rewrites and rewrites repeating an earlier text (or the original)
    /// are dropped.
    pub fn with_variants<I, S>(original: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let original = original.into();
        let mut queries: Vec<RetrievalQuery> = Vec::new();
        for variant in variants {
            let text = variant.into().trim().to_string();
            if text.is_empty() || text == original || queries.iter().any(|q| q.text == text) {
                continue;
            }
            queries.push(RetrievalQuery::augmented(text));
        }
        queries.push(RetrievalQuery::original(original));
        Self { queries }
    }

    pub fn original(&self) -> &RetrievalQuery {
        // Construction guarantees a trailing original query.
        &self.queries[self.queries.len() - 1]
    }

    pub fn augmented(&self) -> impl Iterator<Item = &RetrievalQuery> {
        self.queries
            .iter()
            .filter(|q| q.kind == QueryKind::Augmented)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RetrievalQuery> {
        self.queries.iter()
    }

    pub fn texts(&self) -> Vec<String> {
        self.queries.iter().map(|q| q.text.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl<'a> IntoIterator for &'a QuerySet {
    type Item = &'a RetrievalQuery;
    type IntoIter = std::slice::Iter<'a, RetrievalQuery>;

    fn into_iter(self) -> Self::IntoIter {
        self.queries.iter()
    }
}

/// A passage returned by the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    /// Stable identifier used for deduplication. Passages without one are
    /// never treated as duplicates of each other.
    #[serde(
        default,
        deserialize_with = "deserialize_passage_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// A passage with no stable identifier.
    pub fn anonymous(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata: HashMap::new(),
        }
    }
}

/// Normalize a JSON identifier (string or number) into its string form.
pub fn passage_id_from_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_passage_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(passage_id_from_value))
}

/// Token usage statistics from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// A request to the language-model backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// `Some(0.0)` disables sampling.
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub model: Option<String>,
    /// Pass-through generation parameters merged into the request body.
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    /// Deterministic request: sampling disabled.
    pub fn deterministic(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// The result of a non-streaming completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}
