//! GrammarRag - main retrieval API
//!
//! Owns the loaded chunk set, the current index snapshot, and the embedding and
//! completion providers. All methods take `&self`, so one instance can be shared
//! behind an `Arc` between concurrent queries and a background rebuild.

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{Result, VedyutError};
use crate::llm::{CompletionProvider, OpenAiChat};
use crate::ml::{
    rank, EmbeddingProvider, IndexArtifact, IndexBuilder, IndexSnapshot, IndexStats, OpenAiEmbedder,
    QueryFilter, ScoredChunk,
};
use crate::text::{GrammarChunk, GrammarLoader, LoadFailure};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// What `build_index` ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A persisted index covering the loaded chunks was reused
    Cached { chunks: usize },
    /// Embeddings were generated and the artifact written
    Built {
        chunks: usize,
        batches: usize,
        dimension: usize,
    },
    /// There was nothing to index
    Skipped,
}

/// Result of merging a directory into the chunk set
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub files_loaded: usize,
    /// Chunks with ids not seen before
    pub added: usize,
    /// Chunks that replaced an existing chunk with the same id
    pub updated: usize,
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RagStats {
    pub loaded_chunks: usize,
    pub index_path: PathBuf,
    pub index: Option<IndexStats>,
}

/// Retrieval-augmented access to Sanskrit grammar treatises
pub struct GrammarRag {
    config: Config,
    loader: GrammarLoader,
    chunks: RwLock<Vec<GrammarChunk>>,
    snapshot: RwLock<Option<Arc<IndexSnapshot>>>,
    build_guard: tokio::sync::Mutex<()>,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn CompletionProvider>,
}

impl GrammarRag {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn CompletionProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let loader =
            GrammarLoader::new(config.classification.clone())?.skipping(config.grammar.index_file.clone());

        log::info!(
            "GrammarRag initialized for {} (embeddings: {}, llm: {})",
            config.grammar.data_dir.display(),
            embedder.model_id(),
            llm.model_id()
        );

        Ok(Self {
            config,
            loader,
            chunks: RwLock::new(Vec::new()),
            snapshot: RwLock::new(None),
            build_guard: tokio::sync::Mutex::new(()),
            embedder,
            llm,
        })
    }

    /// Build with OpenAI-compatible embedding and chat providers from `config`
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = Arc::new(OpenAiEmbedder::new(&config.embedding)?);
        let llm = Arc::new(OpenAiChat::new(&config.llm)?);
        Self::new(config, embedder, llm)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn llm(&self) -> &dyn CompletionProvider {
        self.llm.as_ref()
    }

    pub fn index_path(&self) -> PathBuf {
        self.config.grammar.index_path()
    }

    /// Load the configured grammar directory into the chunk set
    pub fn load_texts(&self) -> Result<LoadSummary> {
        let dir = self.config.grammar.data_dir.clone();
        self.load_texts_from(dir)
    }

    /// Load every treatise and rule file in `dir`, upserting by chunk id
    pub fn load_texts_from<P: AsRef<Path>>(&self, dir: P) -> Result<LoadSummary> {
        let report = self.loader.load(dir.as_ref())?;
        let (added, updated) = self.add_chunks(report.chunks);
        log::info!(
            "Loaded {} file(s) from {}: {} new chunk(s), {} updated",
            report.files_loaded,
            dir.as_ref().display(),
            added,
            updated
        );

        Ok(LoadSummary {
            files_loaded: report.files_loaded,
            added,
            updated,
            failures: report.failures,
        })
    }

    /// Merge chunks into the set; returns `(added, updated)`
    pub fn add_chunks(&self, incoming: Vec<GrammarChunk>) -> (usize, usize) {
        let mut chunks = write_lock(&self.chunks);
        let mut positions: HashMap<String, usize> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();

        let (mut added, mut updated) = (0, 0);
        for chunk in incoming {
            match positions.get(&chunk.id) {
                Some(&pos) => {
                    chunks[pos] = chunk;
                    updated += 1;
                }
                None => {
                    positions.insert(chunk.id.clone(), chunks.len());
                    chunks.push(chunk);
                    added += 1;
                }
            }
        }
        (added, updated)
    }

    /// Copy of the current chunk set
    pub fn chunks(&self) -> Vec<GrammarChunk> {
        read_lock(&self.chunks).clone()
    }

    pub fn chunk_count(&self) -> usize {
        read_lock(&self.chunks).len()
    }

    /// Chunks whose rule reference equals `reference`, in set order
    pub fn chunks_by_reference(&self, reference: &str) -> Vec<GrammarChunk> {
        read_lock(&self.chunks)
            .iter()
            .filter(|c| c.reference.as_deref() == Some(reference))
            .cloned()
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        read_lock(&self.snapshot).is_some()
    }

    /// The snapshot queries currently run against
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        read_lock(&self.snapshot)
            .clone()
            .ok_or_else(|| VedyutError::NotReady("Index not built. Call build_index() first.".to_string()))
    }

    pub async fn build_index(&self, force_rebuild: bool) -> Result<BuildOutcome> {
        self.build_index_with_cancel(force_rebuild, &CancelToken::new()).await
    }

    /// Reuse the persisted index when it covers the loaded chunks, otherwise
    /// embed everything and persist a fresh artifact.
    ///
    /// Concurrent calls run one after another. Queries keep using the previous
    /// snapshot until the new one is installed.
    pub async fn build_index_with_cancel(
        &self,
        force_rebuild: bool,
        cancel: &CancelToken,
    ) -> Result<BuildOutcome> {
        let _guard = self.build_guard.lock().await;
        let index_path = self.index_path();

        if !force_rebuild && index_path.exists() {
            if let Some(outcome) = self.adopt_artifact(&index_path)? {
                return Ok(outcome);
            }
        }

        let chunks = self.chunks();
        if chunks.is_empty() {
            log::warn!("No chunks to index. Call load_texts() first.");
            return Ok(BuildOutcome::Skipped);
        }

        let builder = IndexBuilder::new(self.embedder.as_ref())
            .batch_size(self.config.embedding.batch_size)
            .concurrency(self.config.embedding.concurrency);
        let batches = builder.batch_count(chunks.len());

        let snapshot = builder.build(chunks, cancel).await?;
        cancel.check()?;

        IndexArtifact::from_snapshot(&snapshot).save(&index_path)?;
        self.attach_embeddings(&snapshot);

        let outcome = BuildOutcome::Built {
            chunks: snapshot.len(),
            batches,
            dimension: snapshot.dimension(),
        };
        self.install(snapshot);
        log::info!("Index built: {:?}", outcome);
        Ok(outcome)
    }

    fn adopt_artifact(&self, path: &Path) -> Result<Option<BuildOutcome>> {
        log::info!("Loading existing index from {}", path.display());
        let snapshot = IndexArtifact::load(path)?.into_snapshot()?;

        let mut chunks = write_lock(&self.chunks);
        if !snapshot.covers(&chunks) {
            log::warn!(
                "Index at {} is missing or has different text for some of the {} loaded chunks; rebuilding",
                path.display(),
                chunks.len()
            );
            return Ok(None);
        }
        *chunks = snapshot.chunks().to_vec();
        drop(chunks);

        let count = snapshot.len();
        self.install(snapshot);
        Ok(Some(BuildOutcome::Cached { chunks: count }))
    }

    // Chunks loaded while the build ran keep no embedding until the next build.
    fn attach_embeddings(&self, snapshot: &IndexSnapshot) {
        let embedded: HashMap<&str, &GrammarChunk> =
            snapshot.chunks().iter().map(|c| (c.id.as_str(), c)).collect();

        for chunk in write_lock(&self.chunks).iter_mut() {
            if let Some(source) = embedded.get(chunk.id.as_str()) {
                if source.text == chunk.text {
                    chunk.embedding = source.embedding.clone();
                }
            }
        }
    }

    fn install(&self, snapshot: IndexSnapshot) {
        *write_lock(&self.snapshot) = Some(Arc::new(snapshot));
    }

    pub async fn query(&self, text: &str, top_k: usize, filter: &QueryFilter) -> Result<Vec<ScoredChunk>> {
        self.query_with_cancel(text, top_k, filter, &CancelToken::new()).await
    }

    /// Rank indexed chunks by similarity to `text`
    pub async fn query_with_cancel(
        &self,
        text: &str,
        top_k: usize,
        filter: &QueryFilter,
        cancel: &CancelToken,
    ) -> Result<Vec<ScoredChunk>> {
        let snapshot = self.snapshot()?;
        log::info!("Searching for: '{}' (top {})", text, top_k);

        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = cancel.run(self.embedder.embed_single(text)).await?;
        let ranked = rank(&snapshot, &query_vec, top_k, filter)?;

        log::debug!("Found {} results for '{}'", ranked.len(), text);
        Ok(ranked
            .into_iter()
            .map(|(idx, score)| ScoredChunk {
                chunk: snapshot.chunks()[idx].clone(),
                score,
            })
            .collect())
    }

    pub fn stats(&self) -> RagStats {
        RagStats {
            loaded_chunks: self.chunk_count(),
            index_path: self.index_path(),
            index: read_lock(&self.snapshot).as_ref().map(|s| s.stats()),
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, CompletionOptions};
    use crate::ml::HashEmbedder;
    use crate::text::Language;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct SilentLlm;

    #[async_trait]
    impl CompletionProvider for SilentLlm {
        async fn complete(&self, _: &[ChatMessage], _: &CompletionOptions) -> Result<String> {
            Ok(String::new())
        }

        fn model_id(&self) -> &str {
            "silent"
        }
    }

    fn rag_in(dir: &TempDir) -> GrammarRag {
        let mut config = Config::default();
        config.grammar.data_dir = dir.path().to_path_buf();
        config.embedding.batch_size = 2;
        GrammarRag::new(config, Arc::new(HashEmbedder::new(32)), Arc::new(SilentLlm)).unwrap()
    }

    fn write_treatise(dir: &TempDir) {
        std::fs::write(
            dir.path().join("ashtadhyayi.txt"),
            "1.1.1 वृद्धिरादैच्\n\n6.1.87 आद्गुणः सन्धि\n\nGeneral remarks on verb roots",
        )
        .unwrap();
    }

    #[tokio::test]
    async fn test_query_before_build_is_not_ready() {
        let dir = TempDir::new().unwrap();
        let rag = rag_in(&dir);
        let err = rag.query("vṛddhi", 3, &QueryFilter::new()).await.unwrap_err();
        assert!(err.is_not_ready());
        assert!(!rag.is_ready());
    }

    #[tokio::test]
    async fn test_build_empty_set_is_skipped() {
        let dir = TempDir::new().unwrap();
        let rag = rag_in(&dir);
        assert_eq!(rag.build_index(false).await.unwrap(), BuildOutcome::Skipped);
        assert!(!rag.index_path().exists());
        assert!(!rag.is_ready());
    }

    #[tokio::test]
    async fn test_load_build_query() {
        let dir = TempDir::new().unwrap();
        write_treatise(&dir);
        let rag = rag_in(&dir);

        let summary = rag.load_texts().unwrap();
        assert_eq!(summary.files_loaded, 1);
        assert_eq!(summary.added, 3);

        let outcome = rag.build_index(false).await.unwrap();
        assert_eq!(
            outcome,
            BuildOutcome::Built {
                chunks: 3,
                batches: 2,
                dimension: 32
            }
        );
        assert!(rag.index_path().exists());
        assert!(rag.chunks().iter().all(|c| c.is_embedded()));

        let results = rag.query("6.1.87 आद्गुणः सन्धि", 1, &QueryFilter::new()).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "ashtadhyayi_1");
        assert_eq!(results[0].chunk.language, Language::Sanskrit);
    }

    #[tokio::test]
    async fn test_reload_is_idempotent() {
        let dir = TempDir::new().unwrap();
        write_treatise(&dir);
        let rag = rag_in(&dir);

        rag.load_texts().unwrap();
        let before = rag.chunks();
        let summary = rag.load_texts().unwrap();

        assert_eq!(summary.added, 0);
        assert_eq!(summary.updated, 3);
        assert_eq!(rag.chunks(), before);
    }

    #[tokio::test]
    async fn test_cached_index_is_reused() {
        let dir = TempDir::new().unwrap();
        write_treatise(&dir);

        let first = rag_in(&dir);
        first.load_texts().unwrap();
        first.build_index(false).await.unwrap();

        let second = rag_in(&dir);
        assert_eq!(
            second.build_index(false).await.unwrap(),
            BuildOutcome::Cached { chunks: 3 }
        );
        assert_eq!(second.chunk_count(), 3);
        assert_eq!(second.chunks_by_reference("1.1.1").len(), 1);
    }

    #[tokio::test]
    async fn test_stale_cache_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        write_treatise(&dir);

        let first = rag_in(&dir);
        first.load_texts().unwrap();
        first.build_index(false).await.unwrap();

        std::fs::write(dir.path().join("kale.txt"), "Nouns have eight cases").unwrap();
        let second = rag_in(&dir);
        second.load_texts().unwrap();

        match second.build_index(false).await.unwrap() {
            BuildOutcome::Built { chunks, .. } => assert_eq!(chunks, 4),
            other => panic!("expected rebuild, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chunks_by_reference() {
        let dir = TempDir::new().unwrap();
        let rag = rag_in(&dir);
        rag.add_chunks(vec![
            GrammarChunk::new("a_0", "one", "a", Language::Sanskrit).with_reference(Some("1.1.1".into())),
            GrammarChunk::new("a_1", "two", "a", Language::English).with_reference(Some("1.1.2".into())),
            GrammarChunk::new("b_0", "three", "b", Language::English).with_reference(Some("1.1.1".into())),
        ]);

        let ids: Vec<String> = rag.chunks_by_reference("1.1.1").into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a_0", "b_0"]);
        assert!(rag.chunks_by_reference("9.9.9").is_empty());
    }

    #[tokio::test]
    async fn test_stats() {
        let dir = TempDir::new().unwrap();
        write_treatise(&dir);
        let rag = rag_in(&dir);
        rag.load_texts().unwrap();
        assert!(rag.stats().index.is_none());

        rag.build_index(false).await.unwrap();
        let stats = rag.stats();
        assert_eq!(stats.loaded_chunks, 3);
        let index = stats.index.unwrap();
        assert_eq!(index.total_chunks, 3);
        assert_eq!(index.dimension, 32);
    }
}
