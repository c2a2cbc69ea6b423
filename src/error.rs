//! Error types for vedyut-rag
//!
//! This module provides error handling for every stage of the grammar RAG
//! pipeline: loading treatises, building and persisting the index, retrieval,
//! and the calls made to external embedding and completion services.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for vedyut-rag operations
#[derive(Error, Debug)]
pub enum VedyutError {
    /// Text loading and chunking errors
    #[error("Text processing error: {0}")]
    TextProcessing(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The index has not been built or loaded yet
    #[error("Index not ready: {0}")]
    NotReady(String),

    /// The persisted index carries a version this build cannot read
    #[error("Unsupported index version '{found}' (expected '{expected}')")]
    UnsupportedIndexVersion { found: String, expected: String },

    /// The persisted index is structurally invalid
    #[error("Index format error: {0}")]
    IndexFormat(String),

    /// A structured rule file could not be parsed
    #[error("Malformed rule records in {path}: {message}")]
    MalformedRecords { path: PathBuf, message: String },

    /// Embedding service errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Completion service errors
    #[error("Completion error: {0}")]
    Completion(String),

    /// A completion response did not have the expected structure
    #[error("Unexpected response shape: {0}")]
    ResponseShape(String),

    /// Vector search errors
    #[error("Search error: {0}")]
    Search(String),

    /// Caller supplied arguments that cannot be acted on
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled through its token
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation ran past its deadline
    #[error("Operation exceeded its deadline")]
    DeadlineExceeded,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(String),
}

/// Result type alias for vedyut-rag operations
pub type Result<T> = std::result::Result<T, VedyutError>;

impl VedyutError {
    /// Whether this error leaves the caller in a recoverable "try again later" state
    pub fn is_not_ready(&self) -> bool {
        matches!(self, VedyutError::NotReady(_))
    }
}

impl From<anyhow::Error> for VedyutError {
    fn from(err: anyhow::Error) -> Self {
        VedyutError::Generic(err.to_string())
    }
}
