//! Configuration system for ISbot.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory (`isbot/config.toml`) and/or
//! `.isbot/config.toml` in the workspace directory. The resulting [`IsbotConfig`] is
//! handed to the pipeline once at construction and never mutated per turn.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::prompt;

/// Top-level configuration for ISbot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IsbotConfig {
    pub llm: LlmConfig,
    pub prompts: PromptConfig,
    pub gate: GateConfig,
    pub augment: AugmentConfig,
    pub retrieval: RetrievalConfig,
    pub index: IndexConfig,
    pub recorder: RecorderConfig,
    pub feedback: FeedbackConfig,
    pub server: ServerConfig,
}

/// Language-model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" (any OpenAI-compatible endpoint, including Ollama) or "mock".
    pub provider: String,
    /// Model identifier (e.g., "qwen3:14b").
    pub model: String,
    /// Base URL of the chat completions API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Sampling temperature for the final answer (`None` = backend default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens for the final answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Whether answers are streamed unless a request says otherwise.
    pub use_streaming: bool,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "qwen3:14b".to_string(),
            base_url: Some("http://localhost:11434/v1".to_string()),
            api_key_env: "OPENAI_API_KEY".to_string(),
            api_key: None,
            temperature: None,
            max_tokens: Some(1024),
            use_streaming: true,
            timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    ///
    /// Returns an empty Vec if the config is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(temperature) = self.temperature
            && !(0.0..=2.0).contains(&temperature)
        {
            warnings.push(format!(
                "llm.temperature ({}) is outside the typical range 0.0–2.0",
                temperature
            ));
        }
        if self.max_tokens == Some(0) {
            warnings.push("llm.max_tokens is 0; answers will be empty".to_string());
        }
        if self.timeout_secs == 0 {
            warnings.push("llm.timeout_secs is 0; requests will not time out".to_string());
        }
        warnings
    }
}

/// Prompt texts used for every model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Leading system message for answer generation.
    pub system_prompt: String,
    /// System instruction for the retrieval gate.
    pub decision_prompt: String,
    /// Paraphrase instruction; `{count}` and `{query}` are substituted.
    pub augment_prompt: String,
    /// System instruction for condensing chat history into one search query.
    pub condense_prompt: String,
    /// Line opening the retrieved-documents system message.
    pub context_begin: String,
    /// Line closing the retrieved-documents system message.
    pub context_end: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            system_prompt: prompt::DEFAULT_SYSTEM_PROMPT.to_string(),
            decision_prompt: prompt::DEFAULT_DECISION_PROMPT.to_string(),
            augment_prompt: prompt::DEFAULT_AUGMENT_PROMPT.to_string(),
            condense_prompt: prompt::DEFAULT_CONDENSE_PROMPT.to_string(),
            context_begin: prompt::DEFAULT_CONTEXT_BEGIN.to_string(),
            context_end: prompt::DEFAULT_CONTEXT_END.to_string(),
        }
    }
}

/// Retrieval gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// When false every turn retrieves and no decision call is made.
    pub enabled: bool,
    /// Token cap for the decision reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tokens: None,
        }
    }
}

/// Query augmentation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// When false the query set is just the original query.
    pub enabled: bool,
    /// Number of paraphrases requested from the model.
    pub variants: usize,
    /// Token cap for the paraphrase reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    /// Condense multi-turn history into a standalone query before augmenting.
    pub condense_history: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            variants: 3,
            max_tokens: Some(400),
            condense_history: false,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results fetched per query. Must be positive.
    pub top_k: usize,
    /// Issue index queries concurrently (ordering is preserved).
    pub concurrent: bool,
    /// Continue with an empty context when the index fails instead of failing the turn.
    pub degrade_on_index_error: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            concurrent: false,
            degrade_on_index_error: false,
        }
    }
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// "local" (in-process index over a JSON dataset) or "http".
    pub provider: String,
    /// Dataset for the local index.
    pub dataset_path: PathBuf,
    /// Endpoint for the HTTP index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Embedding dimensionality of the local index.
    pub dimensions: usize,
    /// HTTP index request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            dataset_path: PathBuf::from("dataset/transformed_for_llamaindex.json"),
            url: None,
            dimensions: 512,
            timeout_secs: 30,
        }
    }
}

/// Session recorder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub enabled: bool,
    /// Directory receiving one artifact per answered turn.
    pub directory: PathBuf,
    /// Recording stops once this many artifacts exist.
    pub max_records: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("session_logs"),
            max_records: 1000,
        }
    }
}

/// Feedback link configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Form URL with a `{timestamp}` placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

/// HTTP front-end configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1337,
        }
    }
}

impl IsbotConfig {
    /// Human-readable warnings for questionable but usable values.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();
        if self.augment.enabled && self.augment.variants == 0 {
            warnings.push(
                "augment.variants is 0; retrieval will use the original query only".to_string(),
            );
        }
        if self.recorder.enabled && self.recorder.max_records == 0 {
            warnings.push("recorder.max_records is 0; no sessions will be recorded".to_string());
        }
        if let Some(template) = &self.feedback.url_template
            && !template.contains("{timestamp}")
        {
            warnings.push(
                "feedback.url_template has no {timestamp} placeholder; links will not identify the answer"
                    .to_string(),
            );
        }
        warnings
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "retrieval.top_k must be positive".to_string(),
            });
        }
        match self.llm.provider.as_str() {
            "openai" | "ollama" | "mock" => {}
            other => {
                return Err(ConfigError::Invalid {
                    message: format!("unknown llm.provider '{}'", other),
                });
            }
        }
        match self.index.provider.as_str() {
            "local" => {
                if self.index.dimensions == 0 {
                    return Err(ConfigError::Invalid {
                        message: "index.dimensions must be positive".to_string(),
                    });
                }
            }
            "http" => {
                if self.index.url.is_none() {
                    return Err(ConfigError::MissingField {
                        field: "index.url".to_string(),
                    });
                }
            }
            other => {
                return Err(ConfigError::Invalid {
                    message: format!("unknown index.provider '{}'", other),
                });
            }
        }
        Ok(())
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("cz", "muni", "isbot")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".isbot").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `ISBOT_`)
/// 3. Workspace-local config (`.isbot/config.toml`)
/// 4. User config (`<config dir>/isbot/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&IsbotConfig>,
) -> Result<IsbotConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(IsbotConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (ISBOT_LLM__MODEL, ISBOT_RETRIEVAL__TOP_K, etc.)
    figment = figment.merge(Env::prefixed("ISBOT_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Load configuration from one explicit file on top of the defaults and environment.
pub fn load_config_file(path: &Path) -> Result<IsbotConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ParseError {
            message: format!("configuration file not found: {}", path.display()),
        });
    }
    Figment::from(Serialized::defaults(IsbotConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ISBOT_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}
