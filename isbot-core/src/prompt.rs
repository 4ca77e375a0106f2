//! Prompt composition for every model call the pipeline makes.
//!
//! All builders are pure: they take the conversation (and context, when
//! grounded) and return the exact message sequence sent to the backend.

use crate::config::PromptConfig;
use crate::types::{Conversation, Message};

/// Default system prompt for answer generation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Jsi nápomocný chatbot Masarykovy univerzity. Tvým úkolem je pomáhat uživatelům orientovat se v Informačním systému (IS MU) a poskytovat rady, jak provést požadované akce v systému. Máš k dispozici oficiální dokumenty nápovědy IS MU, které mohou obsahovat užitečné informace. Pokud informace ve zdrojích nejsou dostatečné, řekni to upřímně.";

/// Default retrieval-gate instruction. The reply must be one of two tokens.
pub const DEFAULT_DECISION_PROMPT: &str = "If you can answer directly, reply only: ANSWER\nIf you need external info, reply only: RETRIEVE\nNo other text.";

/// Default paraphrase instruction. `{count}` and `{query}` are substituted.
pub const DEFAULT_AUGMENT_PROMPT: &str = "Vygeneruj {count} různé varianty následujícího dotazu, které mají stejný význam, ale jinou formulaci. Dotaz pravděpodobně souvisí s univerzitním informačním systémem, studiem nebo univerzitou. Ten, kdo se ptá, může být student i učitel. Výsledek vrať výhradně jako JSON seznam řetězců, bez jakéhokoliv formátování kódu (nepoužívej ``` ani žádné značky).\nDotaz: {query}";

/// Default instruction for condensing a chat history into one search query.
pub const DEFAULT_CONDENSE_PROMPT: &str = "You rewrite chat histories into search queries for a document retrieval system.\n\nTask: write the single best Czech search query for the user's latest question, using the whole conversation to resolve what it refers to.\n\nRules:\n- Output the query text only, with no explanation.\n- Write it in Czech.\n- Replace pronouns such as \"it\", \"this\" or \"that\" with the thing they refer to.\n- If the latest question is vague, infer the most likely topic from the conversation.\n- One or two sentences at most.";

/// Default line opening the retrieved-documents message.
pub const DEFAULT_CONTEXT_BEGIN: &str = "Začátek nalezených dokumentů:";

/// Default line closing the retrieved-documents message.
pub const DEFAULT_CONTEXT_END: &str = "Konec nalezených dokumentů.";

/// Builds role-tagged message sequences from the configured prompt texts.
#[derive(Debug, Clone)]
pub struct PromptComposer {
    prompts: PromptConfig,
}

impl PromptComposer {
    pub fn new(prompts: PromptConfig) -> Self {
        Self { prompts }
    }

    /// Gate prompt: the decision instruction followed by the full conversation.
    pub fn build_decision_prompt(&self, conversation: &Conversation) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(&self.prompts.decision_prompt));
        messages.extend(conversation.messages().iter().cloned());
        messages
    }

    /// Final answer prompt.
    ///
    /// The leading system message is set to the system prompt. With a context,
    /// a second system message carrying it between the begin/end markers
    /// follows immediately; the remaining turns are untouched.
    pub fn build_generation_prompt(
        &self,
        conversation: &Conversation,
        context: Option<&str>,
    ) -> Vec<Message> {
        let conversation = conversation
            .clone()
            .with_system_prompt(&self.prompts.system_prompt);
        let mut messages = conversation.into_messages();
        if let Some(context) = context {
            messages.insert(1, Message::system(self.context_message(context)));
        }
        messages
    }

    /// Content of the retrieved-documents system message.
    pub fn context_message(&self, context: &str) -> String {
        format!(
            "{}\n{}\n{}",
            self.prompts.context_begin, context, self.prompts.context_end
        )
    }

    /// Paraphrase request for the query augmenter.
    pub fn build_augmentation_prompt(&self, query: &str, count: usize) -> Vec<Message> {
        let text = self
            .prompts
            .augment_prompt
            .replace("{count}", &count.to_string())
            .replace("{query}", query);
        vec![Message::user(text)]
    }

    /// History condensation request: reformulator instruction plus the chat turns.
    pub fn build_condense_prompt(&self, conversation: &Conversation) -> Vec<Message> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(&self.prompts.condense_prompt));
        messages.extend(conversation.turns().iter().cloned());
        messages
    }
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new(PromptConfig::default())
    }
}
