//! Vector index backends.
//!
//! The pipeline only sees [`VectorIndex`]: a query string and a result bound
//! in, ranked passages out. Three implementations ship here:
//!
//! - [`LocalIndex`] embeds a JSON dataset in memory with [`LocalEmbedder`].
//! - [`HttpIndex`] delegates to a retrieval service over HTTP.
//! - [`StaticIndex`] returns canned results and records every query.

use crate::config::IndexConfig;
use crate::embeddings::{Embedder, LocalEmbedder, cosine_similarity};
use crate::error::IndexError;
use crate::types::{Passage, passage_id_from_value};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// A ranked passage store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `top_k` passages for `query`, best first.
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, IndexError>;

    fn name(&self) -> &str;
}

/// Build the index selected by `config.provider`.
pub fn create_index(config: &IndexConfig) -> Result<Arc<dyn VectorIndex>, IndexError> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalIndex::load_dataset(
            &config.dataset_path,
            config.dimensions,
        )?)),
        "http" => {
            let url = config.url.as_deref().ok_or_else(|| IndexError::Unavailable {
                message: "index.url is required for the http index".to_string(),
            })?;
            Ok(Arc::new(HttpIndex::new(
                url,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        other => Err(IndexError::Unavailable {
            message: format!("unknown index provider '{other}'"),
        }),
    }
}

/// One record of the dataset file: `{"text": ..., "metadata": {...}}`.
#[derive(Debug, Deserialize)]
struct DatasetBlock {
    text: String,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

impl From<DatasetBlock> for Passage {
    fn from(block: DatasetBlock) -> Self {
        Passage {
            id: block.metadata.get("id").and_then(passage_id_from_value),
            text: block.text,
            metadata: block.metadata,
        }
    }
}

struct IndexedPassage {
    passage: Passage,
    vector: Vec<f32>,
}

/// In-memory index over embedded passages.
pub struct LocalIndex {
    entries: Vec<IndexedPassage>,
    embedder: Box<dyn Embedder>,
}

impl LocalIndex {
    pub fn from_passages(passages: Vec<Passage>, embedder: impl Embedder + 'static) -> Self {
        let entries = passages
            .into_iter()
            .map(|passage| IndexedPassage {
                vector: embedder.embed(&passage.text),
                passage,
            })
            .collect();
        Self {
            entries,
            embedder: Box::new(embedder),
        }
    }

    /// Load a dataset file (a JSON array of `{text, metadata}` blocks).
    ///
    /// A passage's stable id is its `metadata.id`, string or number.
    pub fn load_dataset(path: &Path, dimensions: usize) -> Result<Self, IndexError> {
        let dataset_err = |message: String| IndexError::Dataset {
            path: path.to_path_buf(),
            message,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| dataset_err(e.to_string()))?;
        let blocks: Vec<DatasetBlock> =
            serde_json::from_str(&raw).map_err(|e| dataset_err(e.to_string()))?;
        let passages: Vec<Passage> = blocks.into_iter().map(Passage::from).collect();
        info!(
            path = %path.display(),
            passages = passages.len(),
            "Loaded index dataset"
        );
        Ok(Self::from_passages(passages, LocalEmbedder::new(dimensions)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VectorIndex for LocalIndex {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, IndexError> {
        let query_vector = self.embedder.embed(query);
        let mut scored: Vec<(f32, &IndexedPassage)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(&query_vector, &entry.vector), entry))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        // Stable sort: equal scores keep dataset order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(_, entry)| entry.passage.clone())
            .collect())
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Response body of the retrieval service: a bare list or `{"results": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    List(Vec<Passage>),
    Wrapped { results: Vec<Passage> },
}

/// Client for a retrieval service.
///
/// Sends `POST {url}` with `{"query": ..., "top_k": ...}`.
pub struct HttpIndex {
    client: reqwest::Client,
    url: String,
}

impl HttpIndex {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

/// Parse a search response body, filling missing ids from `metadata.id`.
pub fn parse_search_response(body: &str, top_k: usize) -> Result<Vec<Passage>, IndexError> {
    let parsed: SearchResponse =
        serde_json::from_str(body).map_err(|e| IndexError::InvalidResponse {
            message: e.to_string(),
        })?;
    let passages = match parsed {
        SearchResponse::List(p) | SearchResponse::Wrapped { results: p } => p,
    };
    Ok(passages
        .into_iter()
        .take(top_k)
        .map(|mut p| {
            if p.id.is_none() {
                p.id = p.metadata.get("id").and_then(passage_id_from_value);
            }
            p
        })
        .collect())
}

#[async_trait]
impl VectorIndex for HttpIndex {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, IndexError> {
        let body = serde_json::json!({ "query": query, "top_k": top_k });
        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexError::Unavailable {
                message: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| IndexError::Unavailable {
            message: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(IndexError::Unavailable {
                message: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }
        let passages = parse_search_response(&text, top_k)?;
        debug!(query, results = passages.len(), "Index search");
        Ok(passages)
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Canned index for tests and offline runs.
///
/// Unknown queries return no passages. Every search is recorded.
#[derive(Default)]
pub struct StaticIndex {
    results: HashMap<String, Vec<Passage>>,
    queries: Mutex<Vec<String>>,
    failure: Option<String>,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index whose every search fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_results(mut self, query: impl Into<String>, passages: Vec<Passage>) -> Self {
        self.results.insert(query.into(), passages);
        self
    }

    /// Queries searched so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl VectorIndex for StaticIndex {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Passage>, IndexError> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.to_string());
        if let Some(message) = &self.failure {
            return Err(IndexError::Unavailable {
                message: message.clone(),
            });
        }
        Ok(self
            .results
            .get(query)
            .map(|p| p.iter().take(top_k).cloned().collect())
            .unwrap_or_default())
    }

    fn name(&self) -> &str {
        "static"
    }
}
