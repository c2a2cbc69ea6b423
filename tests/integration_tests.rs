//! End-to-end retrieval tests
//!
//! Loads grammar directories from disk, builds indexes with offline embedders,
//! and checks ranking, filtering and snapshot behaviour through `GrammarRag`.

use approx::assert_relative_eq;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use vedyut_rag::ml::{Embedding, HashEmbedder};
use vedyut_rag::{
    ChatMessage, CompletionOptions, CompletionProvider, Config, EmbeddingProvider, GrammarChunk,
    GrammarRag, Language, QueryFilter, Result,
};

struct CannedLlm;

#[async_trait]
impl CompletionProvider for CannedLlm {
    async fn complete(&self, _: &[ChatMessage], _: &CompletionOptions) -> Result<String> {
        Ok("1".to_string())
    }

    fn model_id(&self) -> &str {
        "canned"
    }
}

/// Maps known texts to fixed vectors; anything else embeds to the first axis
struct TableEmbedder {
    table: HashMap<String, Embedding>,
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        Ok(texts
            .iter()
            .map(|t| self.table.get(t).cloned().unwrap_or_else(|| vec![1.0, 0.0, 0.0]))
            .collect())
    }

    fn model_id(&self) -> &str {
        "table"
    }
}

/// Hash embeddings whose multi-text calls wait until the gate opens
struct GatedEmbedder {
    inner: HashEmbedder,
    open: watch::Sender<bool>,
    waiting: AtomicBool,
}

#[async_trait]
impl EmbeddingProvider for GatedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.len() > 1 {
            let mut rx = self.open.subscribe();
            self.waiting.store(true, Ordering::SeqCst);
            let _ = rx.wait_for(|open| *open).await;
        }
        self.inner.embed(texts).await
    }

    fn model_id(&self) -> &str {
        "gated"
    }
}

fn config_for(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.grammar.data_dir = dir.path().to_path_buf();
    config
}

fn rag_with(dir: &TempDir, embedder: Arc<dyn EmbeddingProvider>) -> GrammarRag {
    GrammarRag::new(config_for(dir), embedder, Arc::new(CannedLlm)).unwrap()
}

fn five_chunks() -> Vec<GrammarChunk> {
    let specs = [
        ("r_0", "guṇa sandhi", Some("sandhi"), Language::Sanskrit),
        ("r_1", "vṛddhi sandhi", Some("sandhi"), Language::English),
        ("r_2", "present tense", Some("lakara"), Language::English),
        ("r_3", "root bhū", Some("dhatu"), Language::Sanskrit),
        ("r_4", "the alphabet", None, Language::English),
    ];
    specs
        .iter()
        .map(|(id, text, topic, language)| {
            GrammarChunk::new(*id, *text, "rules", *language).with_topic(topic.map(str::to_string))
        })
        .collect()
}

fn five_chunk_table() -> TableEmbedder {
    let vectors = [
        vec![1.0, 0.0, 0.0],
        vec![0.9, 0.1, 0.0],
        vec![0.5, 0.5, 0.0],
        vec![0.0, 1.0, 0.0],
        vec![0.0, 0.0, 1.0],
    ];
    let mut table: HashMap<String, Embedding> = five_chunks()
        .into_iter()
        .zip(vectors)
        .map(|(chunk, v)| (chunk.text, v))
        .collect();
    table.insert("near the second axis".to_string(), vec![0.1, 1.0, 0.0]);
    TableEmbedder { table }
}

async fn five_chunk_rag(dir: &TempDir) -> GrammarRag {
    let rag = rag_with(dir, Arc::new(five_chunk_table()));
    rag.add_chunks(five_chunks());
    rag.build_index(false).await.unwrap();
    rag
}

#[tokio::test]
async fn test_load_free_form_directory() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = TempDir::new()?;
    std::fs::write(
        dir.path().join("ashtadhyayi.txt"),
        "1.1.1 वृद्धिरादैच्\n\n1.1.2 अदेङ्गुणः",
    )?;
    std::fs::write(
        dir.path().join("kale_grammar.txt"),
        "Sanskrit nouns are declined in eight cases.",
    )?;

    let rag = rag_with(&dir, Arc::new(HashEmbedder::default()));
    let summary = rag.load_texts()?;
    assert_eq!(summary.files_loaded, 2);

    let chunks = rag.chunks();
    assert_eq!(chunks.len(), 3);
    let sanskrit = chunks.iter().filter(|c| c.language == Language::Sanskrit).count();
    let english = chunks.iter().filter(|c| c.language == Language::English).count();
    assert_eq!(sanskrit, 2);
    assert_eq!(english, 1);
    assert_eq!(chunks[0].reference.as_deref(), Some("1.1.1"));
    assert_eq!(chunks[2].topic.as_deref(), Some("vibhakti"));

    Ok(())
}

#[tokio::test]
async fn test_load_structured_record() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    std::fs::write(
        dir.path().join("sutras.json"),
        r#"[{"sutra": "1.1.1", "sanskrit": "वृद्धिरादैच्", "english": "a,ai,au are vṛddhi", "topic": "sandhi"}]"#,
    )?;

    let rag = rag_with(&dir, Arc::new(HashEmbedder::default()));
    rag.load_texts()?;

    let chunks = rag.chunks();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c.reference.as_deref() == Some("1.1.1")));
    assert!(chunks.iter().all(|c| c.topic.as_deref() == Some("sandhi")));
    assert_eq!(chunks[0].language, Language::Sanskrit);
    assert_eq!(chunks[1].language, Language::English);

    Ok(())
}

#[tokio::test]
async fn test_top_three_of_five() {
    let dir = TempDir::new().unwrap();
    let rag = five_chunk_rag(&dir).await;

    let results = rag.query("guṇa sandhi", 3, &QueryFilter::new()).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.windows(2).all(|pair| pair[0].score >= pair[1].score));
    assert_eq!(results[0].chunk.id, "r_0");
}

#[tokio::test]
async fn test_ranking_is_deterministic_and_self_score_is_one() {
    let dir = TempDir::new().unwrap();
    let rag = five_chunk_rag(&dir).await;

    let first = rag.query("root bhū", 5, &QueryFilter::new()).await.unwrap();
    for _ in 0..5 {
        let again = rag.query("root bhū", 5, &QueryFilter::new()).await.unwrap();
        assert_eq!(again, first);
    }
    assert_eq!(first[0].chunk.id, "r_3");
    assert_relative_eq!(first[0].score, 1.0, epsilon = 1e-6);
}

#[tokio::test]
async fn test_filter_without_matches_falls_back() {
    let dir = TempDir::new().unwrap();
    let rag = five_chunk_rag(&dir).await;

    let unfiltered = rag.query("near the second axis", 3, &QueryFilter::new()).await.unwrap();
    let fallback = rag
        .query("near the second axis", 3, &QueryFilter::new().topic("samasa"))
        .await
        .unwrap();

    assert!(!fallback.is_empty());
    assert_eq!(fallback, unfiltered);
}

#[tokio::test]
async fn test_filter_matches_are_respected() {
    let dir = TempDir::new().unwrap();
    let rag = five_chunk_rag(&dir).await;

    let sandhi = rag
        .query("near the second axis", 5, &QueryFilter::new().topic("sandhi"))
        .await
        .unwrap();
    assert_eq!(sandhi.len(), 2);
    assert!(sandhi.iter().all(|r| r.chunk.topic.as_deref() == Some("sandhi")));

    let filter = QueryFilter::new().topic("sandhi").language(Language::English);
    let both = rag.query("near the second axis", 5, &filter).await.unwrap();
    assert_eq!(both.len(), 1);
    assert_eq!(both[0].chunk.id, "r_1");
}

#[tokio::test]
async fn test_top_k_bound() {
    let dir = TempDir::new().unwrap();
    let rag = five_chunk_rag(&dir).await;

    for k in 0..8 {
        let results = rag.query("guṇa sandhi", k, &QueryFilter::new()).await.unwrap();
        assert_eq!(results.len(), k.min(5));
    }

    let english = QueryFilter::new().language(Language::English);
    let results = rag.query("guṇa sandhi", 5, &english).await.unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_queries_use_previous_snapshot_during_rebuild() {
    let dir = TempDir::new().unwrap();
    let (open, _) = watch::channel(true);
    let embedder = Arc::new(GatedEmbedder {
        inner: HashEmbedder::new(32),
        open,
        waiting: AtomicBool::new(false),
    });

    let rag = Arc::new(rag_with(&dir, embedder.clone()));
    rag.add_chunks(vec![
        GrammarChunk::new("a_0", "vowel sandhi", "a", Language::English),
        GrammarChunk::new("a_1", "consonant sandhi", "a", Language::English),
    ]);
    rag.build_index(false).await.unwrap();
    let before = rag.snapshot().unwrap();

    embedder.open.send_replace(false);
    embedder.waiting.store(false, Ordering::SeqCst);
    rag.add_chunks(vec![GrammarChunk::new("a_2", "visarga sandhi", "a", Language::English)]);

    let rebuild = {
        let rag = rag.clone();
        tokio::spawn(async move { rag.build_index(true).await })
    };
    while !embedder.waiting.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // the rebuild is blocked mid-embedding; queries see the old index
    let results = rag.query("vowel sandhi", 10, &QueryFilter::new()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(Arc::ptr_eq(&before, &rag.snapshot().unwrap()));

    embedder.open.send_replace(true);
    rebuild.await.unwrap().unwrap();

    let results = rag.query("vowel sandhi", 10, &QueryFilter::new()).await.unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_query_dimension_mismatch_is_search_error() {
    let dir = TempDir::new().unwrap();
    let rag = five_chunk_rag(&dir).await;

    // same data directory, different embedder dimension
    let other = rag_with(&dir, Arc::new(HashEmbedder::new(16)));
    other.build_index(false).await.unwrap();
    let err = other.query("anything", 3, &QueryFilter::new()).await.unwrap_err();
    assert!(matches!(err, vedyut_rag::VedyutError::Search(_)));
}
