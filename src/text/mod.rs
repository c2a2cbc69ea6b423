//! Text loading and chunking for grammar treatises
//!
//! This module turns free-form treatise files and structured rule records into
//! [`GrammarChunk`]s carrying provenance, reference, topic, and language.

pub mod chunking;
pub mod inference;
pub mod loader;

// Re-export main types and functions
pub use chunking::{GrammarChunk, Language, ParagraphChunker};
pub use inference::ReferenceExtractor;
pub use loader::{GrammarLoader, LoadFailure, LoadReport, RuleRecord};
