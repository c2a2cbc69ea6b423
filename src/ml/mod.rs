//! Embedding and retrieval for vedyut-rag
//!
//! Embedding providers turn chunk text into vectors, the index module holds
//! and persists embedded chunks, and search ranks them against a query.

pub mod embedding;
pub mod index;
pub mod search;

// Re-export main types and functions
pub use embedding::{Embedding, EmbeddingProvider, HashEmbedder, OpenAiEmbedder};
pub use index::{IndexArtifact, IndexBuilder, IndexSnapshot, IndexStats, INDEX_FORMAT_VERSION};
pub use search::{cosine_similarity, rank, QueryFilter, ScoredChunk};
