//! Deduplicating retrieval across a query set.

use crate::error::{IndexError, PipelineError};
use crate::index::VectorIndex;
use crate::types::{Passage, QuerySet};
use futures::future::try_join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Merge result batches into one list without repeated ids.
///
/// Batches are walked in order and each batch in rank order; a passage is
/// kept the first time its id is seen. Passages without an id are always kept.
pub fn dedup_passages<I>(batches: I) -> Vec<Passage>
where
    I: IntoIterator<Item = Vec<Passage>>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();
    for batch in batches {
        for passage in batch {
            match &passage.id {
                Some(id) if !seen.insert(id.clone()) => continue,
                _ => unique.push(passage),
            }
        }
    }
    unique
}

/// Runs every query of a [`QuerySet`] against the index and deduplicates.
pub struct DedupRetriever {
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    concurrent: bool,
}

impl DedupRetriever {
    /// Fails when `top_k` is zero.
    pub fn new(index: Arc<dyn VectorIndex>, top_k: usize) -> Result<Self, PipelineError> {
        if top_k == 0 {
            return Err(PipelineError::InvalidTopK);
        }
        Ok(Self {
            index,
            top_k,
            concurrent: false,
        })
    }

    /// Issue all index queries at once. Merge order stays the query order.
    pub fn concurrent(mut self, concurrent: bool) -> Self {
        self.concurrent = concurrent;
        self
    }

    pub async fn retrieve(&self, queries: &QuerySet) -> Result<Vec<Passage>, IndexError> {
        let batches = if self.concurrent {
            try_join_all(
                queries
                    .iter()
                    .map(|q| self.index.search(&q.text, self.top_k)),
            )
            .await?
        } else {
            let mut batches = Vec::with_capacity(queries.len());
            for query in queries {
                batches.push(self.index.search(&query.text, self.top_k).await?);
            }
            batches
        };

        let fetched: usize = batches.iter().map(Vec::len).sum();
        let passages = dedup_passages(batches);
        debug!(
            queries = queries.len(),
            fetched,
            unique = passages.len(),
            index = self.index.name(),
            "Retrieved passages"
        );
        Ok(passages)
    }
}
