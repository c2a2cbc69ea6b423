//! Grammar chunk model and paragraph chunking
//!
//! A [`GrammarChunk`] is the unit of retrieval: one paragraph of a treatise, or
//! one language rendering of a structured rule record.

use crate::error::{Result, VedyutError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use unicode_normalization::UnicodeNormalization;

/// Language a chunk is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Sanskrit,
    English,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Sanskrit => "sanskrit",
            Language::English => "english",
        }
    }

    /// Suffix used in ids of structured-record chunks
    pub(crate) fn id_suffix(&self) -> &'static str {
        match self {
            Language::Sanskrit => "sa",
            Language::English => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = VedyutError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sanskrit" | "sa" => Ok(Language::Sanskrit),
            "english" | "en" => Ok(Language::English),
            other => Err(VedyutError::InvalidInput(format!(
                "unknown language '{}' (expected 'sanskrit' or 'english')",
                other
            ))),
        }
    }
}

/// A chunk of grammar text with provenance metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrammarChunk {
    /// Unique chunk identifier, derived from source and position
    pub id: String,

    /// The actual text content (sūtra, commentary, or explanation)
    pub text: String,

    /// Source document, e.g. "ashtadhyayi" or "kale_grammar"
    pub source: String,

    /// Rule locator such as "1.1.1"
    #[serde(default, alias = "sutra_number", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    /// Grammatical topic tag such as "sandhi"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    pub language: Language,

    /// Embedding vector (set during index build)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl GrammarChunk {
    /// Create an unembedded chunk without reference or topic
    pub fn new(
        id: impl Into<String>,
        text: impl Into<String>,
        source: impl Into<String>,
        language: Language,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source: source.into(),
            reference: None,
            topic: None,
            language,
            embedding: None,
        }
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_topic(mut self, topic: Option<String>) -> Self {
        self.topic = topic;
        self
    }

    /// Citation label used when chunks are quoted in prompts, e.g. "[ashtadhyayi 1.1.1]"
    pub fn citation(&self) -> String {
        format!(
            "[{} {}]",
            self.source,
            self.reference.as_deref().unwrap_or_default()
        )
    }

    /// First `max_chars` characters of the text, with an ellipsis when cut
    pub fn preview(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }

    pub fn is_embedded(&self) -> bool {
        self.embedding.is_some()
    }
}

/// Splits free-form treatise text into paragraphs on blank lines
pub struct ParagraphChunker {
    paragraph_regex: Regex,
}

impl ParagraphChunker {
    pub fn new() -> Result<Self> {
        let paragraph_regex = Regex::new(r"\n\s*\n").map_err(|e| {
            VedyutError::TextProcessing(format!("Failed to compile paragraph regex: {}", e))
        })?;
        Ok(Self { paragraph_regex })
    }

    /// Trimmed, NFC-normalized, non-empty paragraphs in document order
    pub fn split(&self, text: &str) -> Vec<String> {
        self.paragraph_regex
            .split(text)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(normalize_text)
            .collect()
    }
}

/// Unicode NFC normalization so composed and decomposed Devanagari compare equal
pub fn normalize_text(text: &str) -> String {
    text.nfc().collect()
}
