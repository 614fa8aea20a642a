use crate::core::error::{Error, Result};
use crate::search::model::{l2_normalize, EmbeddingProvider};
use crate::storage::index::IndexStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

fn default_limit() -> usize {
    20
}

/// A natural-language search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(rename = "query")]
    pub text: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Minimum similarity score, applied only when `use_threshold` is set
    #[serde(default)]
    pub threshold: f32,
    #[serde(default)]
    pub use_threshold: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            threshold: 0.0,
            use_threshold: false,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self.use_threshold = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub path: String,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Rank `vectors` against a unit query vector.
///
/// Returns `(position, score)` pairs, highest score first with ties kept in
/// position order, truncated to `limit`. With a threshold, results below it
/// are dropped, except that a non-empty candidate list never collapses to
/// nothing: the single best candidate is returned instead.
pub fn rank(query: &[f32], vectors: &[Vec<f32>], limit: usize, threshold: Option<f32>) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = vectors
        .iter()
        .enumerate()
        .map(|(i, v)| (i, dot(query, v)))
        .collect();

    // Stable sort, so equal scores stay in index order.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);

    if let Some(threshold) = threshold {
        let best = scored.first().copied();
        scored.retain(|(_, score)| *score >= threshold);
        if scored.is_empty() {
            if let Some(best) = best {
                scored.push(best);
            }
        }
    }

    scored
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Embeds queries and ranks the stored index against them.
///
/// Queries are embedded on the calling thread, never on the indexer's pool,
/// so a running reindex does not hold searches back.
pub struct SearchEngine {
    store: Arc<IndexStore>,
    provider: Arc<dyn EmbeddingProvider>,
    ready: Arc<AtomicBool>,
}

impl SearchEngine {
    pub fn new(
        store: Arc<IndexStore>,
        provider: Arc<dyn EmbeddingProvider>,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            provider,
            ready,
        }
    }

    /// Search the index. Never mutates stored state.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(Error::NotInitialized);
        }
        if query.limit == 0 {
            return Err(Error::InvalidQuery("limit must be at least 1".to_string()));
        }

        // Fails with IndexInconsistent when vectors and paths do not pair up.
        let snapshot = self.store.load()?;

        let total = snapshot.paths.len();
        let (valid_paths, valid_vectors): (Vec<String>, Vec<Vec<f32>>) = snapshot
            .paths
            .into_iter()
            .zip(snapshot.vectors)
            .filter(|(path, _)| Path::new(path).exists())
            .unzip();

        if valid_paths.is_empty() {
            return Err(Error::NoValidImages);
        }
        if valid_paths.len() < total {
            warn!(
                "{} indexed images no longer exist. Consider reindexing.",
                total - valid_paths.len()
            );
        }

        let query_vector = l2_normalize(self.provider.embed_text(&query.text)?);

        let threshold = query.use_threshold.then_some(query.threshold);
        let ranked = rank(&query_vector, &valid_vectors, query.limit, threshold);
        debug!("Query {:?} matched {} results", query.text, ranked.len());

        Ok(ranked
            .into_iter()
            .map(|(i, score)| SearchResult {
                path: valid_paths[i].clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::model::fake::FakeProvider;
    use crate::storage::index::IndexMetadata;
    use std::fs;
    use tempfile::TempDir;

    fn metadata(total: usize) -> IndexMetadata {
        IndexMetadata {
            total_images: total,
            library_root: "/photos".to_string(),
            embedding_dim: 2,
            model_id: Some("fake".to_string()),
            indexed_at: None,
        }
    }

    #[test]
    fn test_rank_orders_and_limits() {
        // Unit vectors whose similarity to [1, 0] is 0.9, 0.1 and 0.5.
        let vectors = vec![
            vec![0.9, (1.0f32 - 0.81).sqrt()],
            vec![0.1, (1.0f32 - 0.01).sqrt()],
            vec![0.5, (1.0f32 - 0.25).sqrt()],
        ];
        let ranked = rank(&[1.0, 0.0], &vectors, 2, None);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, 0);
        assert!((ranked[0].1 - 0.9).abs() < 1e-6);
        assert_eq!(ranked[1].0, 2);
        assert!((ranked[1].1 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_rank_threshold_falls_back_to_best() {
        let vectors = vec![vec![0.3, 0.0], vec![0.2, 0.0]];
        let ranked = rank(&[1.0, 0.0], &vectors, 10, Some(0.5));
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, 0);
        assert!((ranked[0].1 - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_rank_threshold_filters() {
        let vectors = vec![vec![0.3, 0.0], vec![0.8, 0.0], vec![0.6, 0.0]];
        let ranked = rank(&[1.0, 0.0], &vectors, 10, Some(0.5));
        let positions: Vec<usize> = ranked.iter().map(|(i, _)| *i).collect();
        assert_eq!(positions, vec![1, 2]);
    }

    #[test]
    fn test_rank_ties_keep_index_order() {
        let vectors = vec![vec![0.5, 0.0], vec![0.7, 0.0], vec![0.5, 0.0], vec![0.5, 0.0]];
        let positions: Vec<usize> = rank(&[1.0, 0.0], &vectors, 4, None)
            .into_iter()
            .map(|(i, _)| i)
            .collect();
        assert_eq!(positions, vec![1, 0, 2, 3]);
    }

    #[test]
    fn test_rank_empty_input() {
        assert!(rank(&[1.0, 0.0], &[], 5, Some(0.9)).is_empty());
    }

    #[test]
    fn test_query_json_defaults() {
        let query: SearchQuery = serde_json::from_str(r#"{"query": "dog on a beach"}"#).unwrap();
        assert_eq!(query.text, "dog on a beach");
        assert_eq!(query.limit, 20);
        assert_eq!(query.threshold, 0.0);
        assert!(!query.use_threshold);
    }

    #[test]
    fn test_search_before_ready_is_not_initialized() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open_path(&temp_dir.path().join("index.redb")).unwrap());
        let engine = SearchEngine::new(
            store,
            Arc::new(FakeProvider::new(2)),
            Arc::new(AtomicBool::new(false)),
        );

        let result = engine.search(&SearchQuery::new("anything", 5));
        assert!(matches!(result, Err(Error::NotInitialized)));
    }

    #[test]
    fn test_search_errors() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open_path(&temp_dir.path().join("index.redb")).unwrap());
        let provider = FakeProvider::new(2).with_query("q", vec![1.0, 0.0]);
        let engine = SearchEngine::new(
            store.clone(),
            Arc::new(provider),
            Arc::new(AtomicBool::new(true)),
        );
        let query = SearchQuery::new("q", 5);

        assert!(matches!(engine.search(&query), Err(Error::IndexMissing)));
        assert!(matches!(
            engine.search(&SearchQuery::new("q", 0)),
            Err(Error::InvalidQuery(_))
        ));

        let gone = temp_dir.path().join("gone.jpg").to_str().unwrap().to_string();
        store.save(&[vec![1.0, 0.0]], &[gone], &metadata(1)).unwrap();
        assert!(matches!(engine.search(&query), Err(Error::NoValidImages)));
    }

    #[test]
    fn test_search_filters_stale_paths() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open_path(&temp_dir.path().join("index.redb")).unwrap());
        let provider = FakeProvider::new(2).with_query("q", vec![1.0, 0.0]);
        let engine = SearchEngine::new(
            store.clone(),
            Arc::new(provider),
            Arc::new(AtomicBool::new(true)),
        );

        let present = temp_dir.path().join("present.jpg");
        fs::write(&present, b"x").unwrap();
        let present = present.to_str().unwrap().to_string();
        let gone = temp_dir.path().join("gone.jpg").to_str().unwrap().to_string();

        store
            .save(&[vec![1.0, 0.0], vec![0.0, 1.0]], &[gone, present.clone()], &metadata(2))
            .unwrap();

        let results = engine.search(&SearchQuery::new("q", 5)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].path, present);
        assert!(results[0].score.abs() < 1e-6);
    }

    #[test]
    fn test_search_inconsistent_index() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(IndexStore::open_path(&temp_dir.path().join("index.redb")).unwrap());
        let provider = FakeProvider::new(2).with_query("q", vec![1.0, 0.0]);
        let engine = SearchEngine::new(store.clone(), Arc::new(provider), Arc::new(AtomicBool::new(true)));

        let a = temp_dir.path().join("a.jpg");
        let b = temp_dir.path().join("b.jpg");
        fs::write(&a, b"x").unwrap();
        fs::write(&b, b"x").unwrap();
        let paths = vec![a.to_str().unwrap().to_string(), b.to_str().unwrap().to_string()];
        store.save(&[vec![1.0, 0.0], vec![0.0, 1.0]], &paths, &metadata(2)).unwrap();
        store.corrupt_remove_vector(1);

        assert!(matches!(
            engine.search(&SearchQuery::new("q", 5)),
            Err(Error::IndexInconsistent { vectors: 1, paths: 2 })
        ));
    }
}
