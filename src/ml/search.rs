//! Exact cosine-similarity ranking over an index snapshot
//!
//! The grammar corpora are small (thousands of chunks), so every query scores
//! the full set in parallel and sorts. Filters restrict which scored chunks are
//! eligible; a filter that matches nothing falls back to the whole set.

use crate::error::{Result, VedyutError};
use crate::ml::index::IndexSnapshot;
use crate::text::{GrammarChunk, Language};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Metadata constraints on query results; all set fields must match
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub topic: Option<String>,
    pub language: Option<Language>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.topic.is_none() && self.language.is_none()
    }

    pub fn matches(&self, chunk: &GrammarChunk) -> bool {
        let topic_ok = match &self.topic {
            Some(topic) => chunk.topic.as_deref() == Some(topic.as_str()),
            None => true,
        };
        let language_ok = match self.language {
            Some(language) => chunk.language == language,
            None => true,
        };
        topic_ok && language_ok
    }
}

/// A retrieved chunk with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: GrammarChunk,
    pub score: f32,
}

/// Cosine similarity; 0.0 when either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Rank snapshot chunks against `query`, returning `(position, score)` pairs.
///
/// Scores descend; ties keep index order. At most `top_k` pairs are returned.
pub fn rank(
    snapshot: &IndexSnapshot,
    query: &[f32],
    top_k: usize,
    filter: &QueryFilter,
) -> Result<Vec<(usize, f32)>> {
    if top_k == 0 || snapshot.is_empty() {
        return Ok(Vec::new());
    }
    if query.len() != snapshot.dimension() {
        return Err(VedyutError::Search(format!(
            "Query embedding has dimension {}, index has {}",
            query.len(),
            snapshot.dimension()
        )));
    }

    let chunks = snapshot.chunks();
    let scores: Vec<f32> = chunks
        .par_iter()
        .map(|chunk| cosine_similarity(query, chunk.embedding.as_deref().unwrap_or_default()))
        .collect();

    let mut candidates: Vec<usize> = (0..chunks.len())
        .filter(|&i| filter.matches(&chunks[i]))
        .collect();
    if candidates.is_empty() {
        log::debug!("No chunks match {:?}; ranking all {} chunks", filter, chunks.len());
        candidates = (0..chunks.len()).collect();
    }

    let mut ranked: Vec<(usize, f32)> = candidates.into_iter().map(|i| (i, scores[i])).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(top_k);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn chunk(id: &str, topic: Option<&str>, language: Language, embedding: Vec<f32>) -> GrammarChunk {
        let mut chunk = GrammarChunk::new(id, format!("text {}", id), "test", language)
            .with_topic(topic.map(str::to_string));
        chunk.embedding = Some(embedding);
        chunk
    }

    fn snapshot() -> IndexSnapshot {
        IndexSnapshot::new(vec![
            chunk("a", Some("sandhi"), Language::Sanskrit, vec![1.0, 0.0, 0.0]),
            chunk("b", Some("sandhi"), Language::English, vec![0.8, 0.6, 0.0]),
            chunk("c", Some("samasa"), Language::English, vec![0.0, 1.0, 0.0]),
            chunk("d", None, Language::Sanskrit, vec![0.0, 0.0, 1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_relative_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_rank_orders_by_score() {
        let snapshot = snapshot();
        let ranked = rank(&snapshot, &[1.0, 0.0, 0.0], 3, &QueryFilter::new()).unwrap();

        let ids: Vec<&str> = ranked.iter().map(|(i, _)| snapshot.chunks()[*i].id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_relative_eq!(ranked[0].1, 1.0, epsilon = 1e-6);
        assert_relative_eq!(ranked[1].1, 0.8, epsilon = 1e-6);
    }

    #[test]
    fn test_rank_ties_keep_index_order() {
        let snapshot = snapshot();
        // c and d are both orthogonal to the query
        let ranked = rank(&snapshot, &[1.0, 0.0, 0.0], 4, &QueryFilter::new()).unwrap();
        let tail: Vec<usize> = ranked[2..].iter().map(|(i, _)| *i).collect();
        assert_eq!(tail, vec![2, 3]);
    }

    #[test]
    fn test_rank_filters() {
        let snapshot = snapshot();
        let filter = QueryFilter::new().topic("sandhi").language(Language::English);
        let ranked = rank(&snapshot, &[0.0, 0.0, 1.0], 5, &filter).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(snapshot.chunks()[ranked[0].0].id, "b");
    }

    #[test]
    fn test_rank_empty_filter_falls_back() {
        let snapshot = snapshot();
        let filter = QueryFilter::new().topic("lakara");
        let ranked = rank(&snapshot, &[0.0, 0.0, 1.0], 2, &filter).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(snapshot.chunks()[ranked[0].0].id, "d");
    }

    #[test]
    fn test_rank_bounds() {
        let snapshot = snapshot();
        assert!(rank(&snapshot, &[1.0, 0.0, 0.0], 0, &QueryFilter::new()).unwrap().is_empty());
        assert_eq!(rank(&snapshot, &[1.0, 0.0, 0.0], 100, &QueryFilter::new()).unwrap().len(), 4);
    }

    #[test]
    fn test_rank_dimension_mismatch() {
        let snapshot = snapshot();
        let result = rank(&snapshot, &[1.0, 0.0], 3, &QueryFilter::new());
        assert!(matches!(result, Err(VedyutError::Search(_))));
    }
}
