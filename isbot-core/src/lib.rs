//! # ISbot Core
//!
//! Core library for the ISbot helpdesk assistant.
//! Provides the retrieval-augmented turn pipeline (gate, query augmentation,
//! deduplicating retrieval, prompt composition, answer generation, session
//! recording), the LLM and vector-index interfaces, configuration, and the
//! HTTP front end.

pub mod augment;
pub mod brain;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod feedback;
pub mod gate;
pub mod generator;
pub mod index;
pub mod pipeline;
pub mod prompt;
pub mod providers;
pub mod recorder;
pub mod retriever;
pub mod server;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{LlmProvider, MockLlmProvider, TextStream, collect_stream};
pub use config::{IsbotConfig, load_config};
pub use context::{CONTEXT_DELIMITER, assemble};
pub use error::{IsbotError, Result};
pub use index::{HttpIndex, LocalIndex, StaticIndex, VectorIndex};
pub use pipeline::{Answer, RagPipeline, TurnOptions, TurnRequest, TurnResponse, TurnTrace};
pub use recorder::{SessionRecord, SessionRecorder};
pub use types::{Conversation, Message, Passage, QuerySet, Role};
