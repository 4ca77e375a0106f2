//! Error types for the ISbot core library.
//!
//! One `thiserror` enum per failure domain. Turn failures (model backend,
//! vector index, configuration, turn input) fold into [`IsbotError`];
//! [`RecorderError`] stays separate because recording never fails a turn.

use std::path::PathBuf;

/// Top-level error type for the ISbot core library.
#[derive(Debug, thiserror::Error)]
pub enum IsbotError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Errors from language-model backend interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors from the vector index collaborator.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Index unavailable: {message}")]
    Unavailable { message: String },

    #[error("Invalid index response: {message}")]
    InvalidResponse { message: String },

    #[error("Failed to load dataset {path}: {message}")]
    Dataset { path: PathBuf, message: String },
}

/// Errors from the session recorder.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Failed to prepare session directory {path}: {message}")]
    Directory { path: PathBuf, message: String },

    #[error("Failed to write session record {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("No free session file name for {stem} after {attempts} attempts")]
    NameExhausted { stem: String, attempts: usize },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors raised while validating pipeline input.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Conversation contains no user message")]
    NoUserMessage,

    #[error("Query is empty")]
    EmptyQuery,

    #[error("Retrieval top_k must be positive")]
    InvalidTopK,

    #[error("System message at position {index}; only index 0 may hold one")]
    MisplacedSystemMessage { index: usize },

    #[error("Unknown message role: {role}")]
    UnknownRole { role: String },
}

/// A type alias for results using the top-level `IsbotError`.
pub type Result<T> = std::result::Result<T, IsbotError>;
