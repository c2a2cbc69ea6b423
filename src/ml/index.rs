//! Embedded chunk index: in-memory snapshot, persisted artifact, and builder
//!
//! An [`IndexSnapshot`] is immutable once built. Queries hold an `Arc` to the
//! snapshot they started with, so a rebuild never disturbs them.

use crate::cancel::CancelToken;
use crate::error::{Result, VedyutError};
use crate::ml::embedding::{Embedding, EmbeddingProvider};
use crate::text::GrammarChunk;
use crate::utils::{calculate_progress, write_atomically};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Format version written to and required from index artifacts
pub const INDEX_FORMAT_VERSION: &str = "1.0";

/// Immutable set of embedded chunks sharing one dimension
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    chunks: Vec<GrammarChunk>,
    dimension: usize,
    built_at: Option<DateTime<Utc>>,
}

impl IndexSnapshot {
    /// Validate that every chunk is embedded with the same non-zero dimension
    pub fn new(chunks: Vec<GrammarChunk>) -> Result<Self> {
        let mut dimension = None;
        for chunk in &chunks {
            let len = match &chunk.embedding {
                Some(v) if !v.is_empty() => v.len(),
                Some(_) => {
                    return Err(VedyutError::IndexFormat(format!(
                        "Chunk '{}' has an empty embedding",
                        chunk.id
                    )));
                }
                None => {
                    return Err(VedyutError::IndexFormat(format!(
                        "Chunk '{}' has no embedding",
                        chunk.id
                    )));
                }
            };
            match dimension {
                None => dimension = Some(len),
                Some(expected) if expected != len => {
                    return Err(VedyutError::IndexFormat(format!(
                        "Chunk '{}' has dimension {}, expected {}",
                        chunk.id, len, expected
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            chunks,
            dimension: dimension.unwrap_or(0),
            built_at: None,
        })
    }

    pub fn with_built_at(mut self, built_at: Option<DateTime<Utc>>) -> Self {
        self.built_at = built_at;
        self
    }

    pub fn chunks(&self) -> &[GrammarChunk] {
        &self.chunks
    }

    /// Embedding dimension; 0 for an empty snapshot
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    /// Whether every chunk in `chunks` is present here with the same id and text
    pub fn covers(&self, chunks: &[GrammarChunk]) -> bool {
        let known: HashMap<&str, &str> = self
            .chunks
            .iter()
            .map(|c| (c.id.as_str(), c.text.as_str()))
            .collect();
        chunks
            .iter()
            .all(|c| known.get(c.id.as_str()) == Some(&c.text.as_str()))
    }

    pub fn stats(&self) -> IndexStats {
        let mut by_language = BTreeMap::new();
        let mut by_topic = BTreeMap::new();
        let mut by_source = BTreeMap::new();

        for chunk in &self.chunks {
            *by_language.entry(chunk.language.to_string()).or_insert(0) += 1;
            let topic = chunk.topic.clone().unwrap_or_else(|| "(none)".to_string());
            *by_topic.entry(topic).or_insert(0) += 1;
            *by_source.entry(chunk.source.clone()).or_insert(0) += 1;
        }

        let text_bytes: usize = self.chunks.iter().map(|c| c.text.len()).sum();
        let vector_bytes = self.chunks.len() * self.dimension * std::mem::size_of::<f32>();

        IndexStats {
            total_chunks: self.chunks.len(),
            dimension: self.dimension,
            by_language,
            by_topic,
            by_source,
            built_at: self.built_at,
            memory_usage_bytes: (text_bytes + vector_bytes) as u64,
        }
    }
}

/// Index statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub dimension: usize,
    pub by_language: BTreeMap<String, usize>,
    pub by_topic: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub built_at: Option<DateTime<Utc>>,
    /// Memory usage estimate in bytes
    pub memory_usage_bytes: u64,
}

/// On-disk form of an index: the embedded chunks plus a format version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexArtifact {
    pub chunks: Vec<GrammarChunk>,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub built_at: Option<DateTime<Utc>>,
}

impl IndexArtifact {
    pub fn from_snapshot(snapshot: &IndexSnapshot) -> Self {
        Self {
            chunks: snapshot.chunks.clone(),
            version: INDEX_FORMAT_VERSION.to_string(),
            built_at: snapshot.built_at,
        }
    }

    /// Write the artifact as pretty JSON, replacing any previous file atomically
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)?;
        write_atomically(path, &json)?;
        log::info!("Saved index with {} chunks to {}", self.chunks.len(), path.display());
        Ok(())
    }

    /// Read an artifact, rejecting unknown versions and structural problems
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;

        // check the version before the chunk list so newer layouts report cleanly
        let header: VersionHeader = serde_json::from_slice(&bytes).map_err(|e| {
            VedyutError::IndexFormat(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        match header.version.as_deref() {
            Some(INDEX_FORMAT_VERSION) => {}
            found => {
                return Err(VedyutError::UnsupportedIndexVersion {
                    found: found.unwrap_or("(missing)").to_string(),
                    expected: INDEX_FORMAT_VERSION.to_string(),
                });
            }
        }

        let artifact: IndexArtifact = serde_json::from_slice(&bytes).map_err(|e| {
            VedyutError::IndexFormat(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        log::info!("Loaded index with {} chunks from {}", artifact.chunks.len(), path.display());
        Ok(artifact)
    }

    pub fn into_snapshot(self) -> Result<IndexSnapshot> {
        Ok(IndexSnapshot::new(self.chunks)?.with_built_at(self.built_at))
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    version: Option<String>,
}

/// Embeds chunks in fixed-size batches and assembles a snapshot
pub struct IndexBuilder<'a> {
    embedder: &'a dyn EmbeddingProvider,
    batch_size: usize,
    concurrency: usize,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(embedder: &'a dyn EmbeddingProvider) -> Self {
        Self {
            embedder,
            batch_size: 100,
            concurrency: 1,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Number of embedding requests needed for `chunk_count` chunks
    pub fn batch_count(&self, chunk_count: usize) -> usize {
        chunk_count.div_ceil(self.batch_size)
    }

    /// Embed every chunk and return the resulting snapshot.
    ///
    /// Batches may run concurrently but results are reassembled in input
    /// order. The first failing batch aborts the build; nothing partial is
    /// returned.
    pub async fn build(
        &self,
        mut chunks: Vec<GrammarChunk>,
        cancel: &CancelToken,
    ) -> Result<IndexSnapshot> {
        let total = chunks.len();
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batch_count = self.batch_count(total);
        log::info!(
            "Generating embeddings for {} chunks in {} batch(es) with {}",
            total,
            batch_count,
            self.embedder.model_id()
        );

        let embedder = self.embedder;
        let batch_size = self.batch_size;
        let mut batches = stream::iter(texts.chunks(batch_size).enumerate())
            .map(move |(batch_idx, batch)| async move {
                cancel.check()?;
                let vectors = cancel
                    .run(embedder.embed(batch))
                    .await
                    .map_err(|e| attribute(e, batch_idx, batch_size, total))?;
                if vectors.len() != batch.len() {
                    return Err(VedyutError::Embedding(format!(
                        "Batch {} returned {} embeddings for {} texts",
                        batch_idx + 1,
                        vectors.len(),
                        batch.len()
                    )));
                }
                Ok::<Vec<Embedding>, VedyutError>(vectors)
            })
            .buffered(self.concurrency)
            .boxed();

        let mut embeddings: Vec<Embedding> = Vec::with_capacity(total);
        while let Some(result) = batches.next().await {
            embeddings.extend(result?);
            log::info!(
                "  Embedded {}/{} chunks ({:.0}%)",
                embeddings.len(),
                total,
                calculate_progress(embeddings.len(), total)
            );
        }

        if embeddings.len() != total {
            return Err(VedyutError::Embedding(format!(
                "Embedded {} of {} chunks",
                embeddings.len(),
                total
            )));
        }

        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = Some(embedding);
        }

        Ok(IndexSnapshot::new(chunks)?.with_built_at(Some(Utc::now())))
    }
}

fn attribute(error: VedyutError, batch_idx: usize, batch_size: usize, total: usize) -> VedyutError {
    match error {
        VedyutError::Embedding(message) => VedyutError::Embedding(format!(
            "Batch {} (chunks {}..{}): {}",
            batch_idx + 1,
            batch_idx * batch_size,
            ((batch_idx + 1) * batch_size).min(total),
            message
        )),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::embedding::HashEmbedder;
    use crate::text::Language;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunks(n: usize) -> Vec<GrammarChunk> {
        (0..n)
            .map(|i| GrammarChunk::new(format!("c_{}", i), format!("rule number {}", i), "test", Language::English))
            .collect()
    }

    struct FailingEmbedder {
        calls: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.fail_on {
                return Err(VedyutError::Embedding("service unavailable".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_id(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_build_attaches_embeddings_in_order() {
        let embedder = HashEmbedder::new(16);
        let input = chunks(7);

        let snapshot = IndexBuilder::new(&embedder)
            .batch_size(3)
            .concurrency(2)
            .build(input.clone(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(snapshot.len(), 7);
        assert_eq!(snapshot.dimension(), 16);
        assert!(snapshot.built_at().is_some());
        for (original, embedded) in input.iter().zip(snapshot.chunks()) {
            assert_eq!(original.id, embedded.id);
            assert_eq!(embedded.embedding.as_ref(), Some(&embedder.embed_text(&original.text)));
        }
    }

    #[tokio::test]
    async fn test_build_fails_on_batch_error() {
        let embedder = FailingEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: 1,
        };
        let result = IndexBuilder::new(&embedder)
            .batch_size(2)
            .build(chunks(5), &CancelToken::new())
            .await;

        match result {
            Err(VedyutError::Embedding(message)) => assert!(message.starts_with("Batch 2")),
            other => panic!("expected embedding error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[tokio::test]
    async fn test_last_batch_range_stops_at_chunk_count() {
        let embedder = FailingEmbedder {
            calls: AtomicUsize::new(0),
            fail_on: 2,
        };
        let result = IndexBuilder::new(&embedder)
            .batch_size(2)
            .build(chunks(5), &CancelToken::new())
            .await;

        match result {
            Err(VedyutError::Embedding(message)) => {
                assert!(message.starts_with("Batch 3 (chunks 4..5)"), "{}", message)
            }
            other => panic!("expected embedding error, got {:?}", other.map(|s| s.len())),
        }
    }

    #[test]
    fn test_covers_requires_matching_text() {
        let mut input = chunks(2);
        for chunk in &mut input {
            chunk.embedding = Some(vec![1.0, 0.0]);
        }
        let snapshot = IndexSnapshot::new(input.clone()).unwrap();

        assert!(snapshot.covers(&input));
        assert!(snapshot.covers(&input[..1]));
        assert!(snapshot.covers(&[]));

        let mut edited = input.clone();
        edited[1].text = "rule number 1, revised".to_string();
        assert!(!snapshot.covers(&edited));

        let unknown = chunks(3);
        assert!(!snapshot.covers(&unknown));
    }

    #[tokio::test]
    async fn test_build_respects_cancellation() {
        let embedder = HashEmbedder::new(8);
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = IndexBuilder::new(&embedder).build(chunks(3), &cancel).await;
        assert!(matches!(result, Err(VedyutError::Cancelled)));
    }

    #[test]
    fn test_snapshot_rejects_mixed_dimensions() {
        let mut input = chunks(2);
        input[0].embedding = Some(vec![1.0, 0.0]);
        input[1].embedding = Some(vec![1.0, 0.0, 0.0]);
        assert!(matches!(IndexSnapshot::new(input), Err(VedyutError::IndexFormat(_))));

        let input = chunks(1);
        assert!(matches!(IndexSnapshot::new(input), Err(VedyutError::IndexFormat(_))));
    }

    #[test]
    fn test_artifact_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grammar_index.json");

        let mut input = chunks(2);
        input[0].embedding = Some(vec![0.6, 0.8]);
        input[1].embedding = Some(vec![1.0, 0.0]);
        input[1].topic = Some("sandhi".to_string());
        let snapshot = IndexSnapshot::new(input.clone()).unwrap();

        IndexArtifact::from_snapshot(&snapshot).save(&path).unwrap();
        let loaded = IndexArtifact::load(&path).unwrap();

        assert_eq!(loaded.version, INDEX_FORMAT_VERSION);
        assert_eq!(loaded.chunks, input);
        assert_eq!(loaded.into_snapshot().unwrap().dimension(), 2);
    }

    #[test]
    fn test_artifact_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grammar_index.json");
        std::fs::write(&path, r#"{"chunks": [], "version": "2.0"}"#).unwrap();

        match IndexArtifact::load(&path) {
            Err(VedyutError::UnsupportedIndexVersion { found, expected }) => {
                assert_eq!(found, "2.0");
                assert_eq!(expected, "1.0");
            }
            other => panic!("expected version error, got {:?}", other.map(|a| a.version)),
        }
    }

    #[test]
    fn test_artifact_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grammar_index.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(IndexArtifact::load(&path), Err(VedyutError::IndexFormat(_))));
    }

    #[test]
    fn test_stats() {
        let mut input = chunks(3);
        for chunk in &mut input {
            chunk.embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
        }
        input[0].language = Language::Sanskrit;
        input[0].topic = Some("sandhi".to_string());

        let stats = IndexSnapshot::new(input).unwrap().stats();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.dimension, 4);
        assert_eq!(stats.by_language.get("sanskrit"), Some(&1));
        assert_eq!(stats.by_language.get("english"), Some(&2));
        assert_eq!(stats.by_topic.get("sandhi"), Some(&1));
        assert_eq!(stats.by_source.get("test"), Some(&3));
    }
}
