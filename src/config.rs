//! Configuration for vedyut-rag
//!
//! Every section has sensible defaults so `Config::default()` works out of the box.
//! A JSON file may override any subset of fields, and a handful of environment
//! variables take precedence over both.

use crate::error::{Result, VedyutError};
use crate::text::Language;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the completion model
pub const ENV_LLM_MODEL: &str = "VEDYUT_LLM_MODEL";
/// Environment variable overriding the embedding model
pub const ENV_EMBEDDING_MODEL: &str = "VEDYUT_EMBEDDING_MODEL";
/// Environment variable overriding the grammar data directory
pub const ENV_GRAMMAR_DIR: &str = "VEDYUT_GRAMMAR_DIR";
/// API key shared by the embedding and completion clients
pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
/// Base URL for OpenAI-compatible servers (Ollama, vLLM, ...)
pub const ENV_BASE_URL: &str = "OPENAI_BASE_URL";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where grammar sources and the index artifact live
    pub grammar: GrammarConfig,
    /// Embedding service settings
    pub embedding: EmbeddingConfig,
    /// Completion service settings
    pub llm: LlmConfig,
    /// Heuristic tables used while loading texts
    pub classification: ClassificationRules,
}

/// Grammar data location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GrammarConfig {
    /// Directory holding `.txt` treatises and `.json` rule files
    pub data_dir: PathBuf,
    /// File name of the persisted index, relative to `data_dir`
    pub index_file: String,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/grammar"),
            index_file: "grammar_index.json".to_string(),
        }
    }
}

impl GrammarConfig {
    /// Full path of the index artifact
    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(&self.index_file)
    }
}

/// Embedding service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model name
    pub model: String,
    /// Texts per embedding request
    pub batch_size: usize,
    /// Embedding requests allowed in flight during a build
    pub concurrency: usize,
    /// OpenAI-compatible base URL; `None` uses the provider default
    pub base_url: Option<String>,
    /// API key; usually supplied through the environment
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Attempts per request before giving up on transient failures
    pub max_retries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-large".to_string(),
            batch_size: 100,
            concurrency: 1,
            base_url: None,
            api_key: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Chat model name
    pub model: String,
    /// Temperature used when a task does not pin its own
    pub temperature: f32,
    /// Response token cap used when a task does not pin its own
    pub max_tokens: Option<u32>,
    /// OpenAI-compatible base URL; `None` uses the provider default
    pub base_url: Option<String>,
    /// API key; usually supplied through the environment
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: None,
            base_url: None,
            api_key: None,
            timeout_secs: 120,
        }
    }
}

/// One entry of the ordered topic table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRule {
    /// Tag assigned when any keyword matches
    pub topic: String,
    /// Keywords in Devanagari and/or transliteration
    pub keywords: Vec<String>,
}

/// Maps a source-name fragment to the language of that source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLanguageRule {
    /// Substring looked for in the file stem
    pub pattern: String,
    pub language: Language,
}

/// Heuristic tables for topic and language tagging.
///
/// Both lists are ordered: the first matching entry wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    pub topics: Vec<TopicRule>,
    pub source_languages: Vec<SourceLanguageRule>,
    /// Language for sources no rule matches
    pub default_language: Language,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        fn rule(topic: &str, keywords: &[&str]) -> TopicRule {
            TopicRule {
                topic: topic.to_string(),
                keywords: keywords.iter().map(|k| k.to_string()).collect(),
            }
        }

        Self {
            topics: vec![
                rule("sandhi", &["sandhi", "सन्धि"]),
                rule("lakara", &["lakara", "लकार", "tense", "वृत्ति"]),
                rule("dhatu", &["dhatu", "धातु", "verb", "root"]),
                rule("vibhakti", &["vibhakti", "विभक्ति", "case"]),
                rule("samasa", &["samasa", "समास", "compound"]),
            ],
            source_languages: vec![
                SourceLanguageRule {
                    pattern: "ashtadhyayi".to_string(),
                    language: Language::Sanskrit,
                },
                SourceLanguageRule {
                    pattern: "kashika".to_string(),
                    language: Language::Sanskrit,
                },
            ],
            default_language: Language::English,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file; missing fields fall back to defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            VedyutError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&data).map_err(|e| {
            VedyutError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty(ENV_LLM_MODEL) {
            self.llm.model = model;
        }
        if let Some(model) = non_empty(ENV_EMBEDDING_MODEL) {
            self.embedding.model = model;
        }
        if let Some(dir) = non_empty(ENV_GRAMMAR_DIR) {
            self.grammar.data_dir = PathBuf::from(dir);
        }
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.embedding.api_key = Some(key.clone());
            self.llm.api_key = Some(key);
        }
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.embedding.base_url = Some(url.clone());
            self.llm.base_url = Some(url);
        }
        self
    }

    /// Reject settings that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.embedding.batch_size == 0 {
            return Err(VedyutError::Config(
                "embedding.batch_size must be at least 1".to_string(),
            ));
        }
        if self.embedding.concurrency == 0 {
            return Err(VedyutError::Config(
                "embedding.concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(VedyutError::Config(format!(
                "llm.temperature {} out of range [0.0, 2.0]",
                self.llm.temperature
            )));
        }
        if self.grammar.index_file.trim().is_empty() {
            return Err(VedyutError::Config(
                "grammar.index_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
