//! API layer for vedyut-rag
//!
//! [`GrammarRag`] is the entry point for loading, indexing and querying grammar
//! texts; [`tasks`] builds Sanskrit-specific generation on top of it.

pub mod rag;
pub mod tasks;

// Re-export main API types
pub use rag::{BuildOutcome, GrammarRag, LoadSummary, RagStats};
pub use tasks::{
    disambiguate_segmentation, explain_grammar, explain_rule, generate_code, generate_test_cases,
    suggest_implementation, translate_sanskrit, translate_sanskrit_stream,
    validate_rule_implementation, RuleLookup, TestCase, ValidationReport,
};
