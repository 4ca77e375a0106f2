//! Query augmentation: model-generated paraphrases that widen retrieval recall.
//!
//! Augmentation only ever degrades. Backend failures and unparseable replies
//! fall back to searching with the original query alone.

use crate::brain::LlmProvider;
use crate::config::AugmentConfig;
use crate::error::PipelineError;
use crate::prompt::PromptComposer;
use crate::types::{CompletionRequest, Conversation, QuerySet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Parse a paraphrase reply into at most `limit` query strings.
///
/// The reply must contain a JSON array of strings. Code fences or prose
/// around the array are ignored; the outermost `[...]` span is parsed.
/// Returns `None` when no such array can be parsed.
pub fn parse_query_variants(raw: &str, limit: usize) -> Option<Vec<String>> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    let candidates: Vec<String> = serde_json::from_str(&raw[start..=end]).ok()?;
    Some(
        candidates
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .take(limit)
            .collect(),
    )
}

pub struct QueryAugmenter {
    provider: Arc<dyn LlmProvider>,
    composer: PromptComposer,
    config: AugmentConfig,
}

impl QueryAugmenter {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        composer: PromptComposer,
        config: AugmentConfig,
    ) -> Self {
        Self {
            provider,
            composer,
            config,
        }
    }

    /// Build the retrieval query set for `original`.
    ///
    /// Paraphrases come first in generation order; the original query is
    /// always the last member.
    pub async fn augment(&self, original: &str) -> QuerySet {
        if !self.config.enabled || self.config.variants == 0 {
            return QuerySet::original_only(original);
        }

        let request = CompletionRequest::deterministic(
            self.composer
                .build_augmentation_prompt(original, self.config.variants),
        )
        .with_max_tokens(self.config.max_tokens);

        let reply = match self.provider.complete(request).await {
            Ok(response) => response.text,
            Err(e) => {
                warn!(error = %e, "Query augmentation failed; searching with the original query only");
                return QuerySet::original_only(original);
            }
        };

        match parse_query_variants(&reply, self.config.variants) {
            Some(variants) => {
                let set = QuerySet::with_variants(original, variants);
                debug!(queries = ?set.texts(), "Augmented query set");
                set
            }
            None => {
                warn!(
                    reply = reply.as_str(),
                    "Unparseable augmentation reply; searching with the original query only"
                );
                QuerySet::original_only(original)
            }
        }
    }

    /// The query that retrieval should start from.
    ///
    /// Normally the latest user message. With `condense_history` enabled and
    /// more than one user turn, the model first rewrites the history into one
    /// standalone query; failures fall back to the latest user message.
    pub async fn standalone_query(
        &self,
        conversation: &Conversation,
    ) -> Result<String, PipelineError> {
        let latest = conversation
            .last_user_message()
            .ok_or(PipelineError::NoUserMessage)?
            .to_string();
        if !self.config.condense_history || conversation.user_turn_count() < 2 {
            return Ok(latest);
        }

        let request =
            CompletionRequest::deterministic(self.composer.build_condense_prompt(conversation))
                .with_max_tokens(self.config.max_tokens);
        match self.provider.complete(request).await {
            Ok(response) => {
                let condensed = response.text.trim();
                if condensed.is_empty() {
                    warn!("History condensation returned nothing; using the latest user message");
                    Ok(latest)
                } else {
                    debug!(query = condensed, "Condensed chat history");
                    Ok(condensed.to_string())
                }
            }
            Err(e) => {
                warn!(error = %e, "History condensation failed; using the latest user message");
                Ok(latest)
            }
        }
    }
}
