//! Lightweight metadata inference for free-form treatise text
//!
//! Reference numbers and topics are recovered with patterns and keyword
//! tables rather than a classifier. Structured rule files carry their own
//! metadata and never pass through here.

use crate::config::ClassificationRules;
use crate::error::{Result, VedyutError};
use crate::text::Language;
use regex::Regex;

/// Only this many leading characters are searched for a rule reference
pub const REFERENCE_SEARCH_CHARS: usize = 100;

/// Finds rule references of the form `adhyāya.pāda.sūtra`, e.g. "3.2.123"
pub struct ReferenceExtractor {
    pattern: Regex,
}

impl ReferenceExtractor {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"\b(\d+\.\d+\.\d+)\b").map_err(|e| {
            VedyutError::TextProcessing(format!("Failed to compile reference regex: {}", e))
        })?;
        Ok(Self { pattern })
    }

    /// First reference within the leading [`REFERENCE_SEARCH_CHARS`] characters
    pub fn extract(&self, text: &str) -> Option<String> {
        let end = text
            .char_indices()
            .nth(REFERENCE_SEARCH_CHARS)
            .map(|(idx, _)| idx)
            .unwrap_or(text.len());

        self.pattern
            .captures(&text[..end])
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl ClassificationRules {
    /// Topic of the first table entry with a keyword contained in `text`
    pub fn infer_topic(&self, text: &str) -> Option<String> {
        let text_lower = text.to_lowercase();
        self.topics
            .iter()
            .find(|rule| {
                rule.keywords
                    .iter()
                    .any(|keyword| text_lower.contains(&keyword.to_lowercase()))
            })
            .map(|rule| rule.topic.clone())
    }

    /// Language of a free-form source, decided by its name only
    pub fn language_for_source(&self, source: &str) -> Language {
        self.source_languages
            .iter()
            .find(|rule| source.contains(rule.pattern.as_str()))
            .map(|rule| rule.language)
            .unwrap_or(self.default_language)
    }
}
