//! # vedyut-rag
//!
//! Retrieval-augmented generation over Sanskrit grammar treatises. Free-form
//! treatise text and structured sūtra records are chunked with provenance,
//! embedded through an OpenAI-compatible service, persisted as a versioned JSON
//! index, and served by cosine-similarity search with topic and language
//! filters. Generation tasks (rule explanation, segmentation disambiguation,
//! code suggestion, test-case synthesis, translation, implementation review)
//! build prompts from the retrieved rules.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vedyut_rag::{Config, GrammarRag, QueryFilter, RuleLookup};
//! use vedyut_rag::api::tasks;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rag = GrammarRag::from_config(Config::default().with_env_overrides())?;
//!
//!     // Chunk every treatise and rule file under data/grammar
//!     rag.load_texts()?;
//!
//!     // Embed, or reuse data/grammar/grammar_index.json when it is current
//!     rag.build_index(false).await?;
//!
//!     let filter = QueryFilter::new().topic("sandhi");
//!     for result in rag.query("vowel sandhi a + i", 3, &filter).await? {
//!         println!("{:.3} {} {}", result.score, result.chunk.citation(), result.chunk.text);
//!     }
//!
//!     let explanation = tasks::explain_rule(&rag, &RuleLookup::Reference("6.1.87".into())).await?;
//!     println!("{}", explanation);
//!
//!     Ok(())
//! }
//! ```

// Core modules
pub mod api;
pub mod cancel;
pub mod config;
pub mod error;
pub mod llm;
pub mod ml;
pub mod text;
pub mod utils;

// Re-export main API types
pub use api::{BuildOutcome, GrammarRag, LoadSummary, RagStats, RuleLookup, TestCase, ValidationReport};
pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Result, VedyutError};

// Re-export commonly used types
pub use llm::{ChatMessage, CompletionOptions, CompletionProvider, CompletionStream, OpenAiChat};
pub use ml::{EmbeddingProvider, HashEmbedder, OpenAiEmbedder, QueryFilter, ScoredChunk};
pub use text::{GrammarChunk, Language};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_imports() {
        // Ensure all major types can be imported
        let _config = Config::default();
        let _filter = QueryFilter::new().language(Language::Sanskrit);
        let _cancel = CancelToken::new();
    }
}
