//! Retrieval subsystem: nearest-neighbour search over indexed documents
//!
//! - Embeds the query with the configured backend
//! - Asks the vector index for the top-K matches, metadata included
//! - Returns them ranked in index order; no re-ranking or deduplication

use docchat_core::config::{RetrievalConfig, MAX_TOP_K};
use docchat_core::{EmbeddingBackend, MatchResult, VectorIndex};
use serde::Serialize;

use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<MatchResult>,
}

/// Keep a requested top-K within what the index accepts.
pub fn clamp_top_k(k: usize) -> usize {
    k.clamp(1, MAX_TOP_K)
}

/// Search for documents similar to `query`.
///
/// `limit` overrides `retrieval.search_top_k`; both are clamped to
/// `[1, MAX_TOP_K]`. An empty query is rejected before any upstream call.
pub async fn search_documents(
    query: &str,
    limit: Option<usize>,
    embedder: &dyn EmbeddingBackend,
    index: &dyn VectorIndex,
    config: &RetrievalConfig,
) -> Result<SearchResponse, ApiError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ApiError::invalid("query field is required"));
    }

    let top_k = clamp_top_k(limit.unwrap_or(config.search_top_k));
    let vector = embedder.embed(query).await?;
    let matches = index.query(&vector, top_k).await?;
    let results = MatchResult::ranked(matches);

    tracing::debug!(top_k, count = results.len(), "Search complete");

    Ok(SearchResponse {
        query: query.to_string(),
        count: results.len(),
        results,
    })
}

/// The single closest document to `vector`, if it clears `min_score`.
pub async fn nearest_document(
    vector: &[f32],
    index: &dyn VectorIndex,
    config: &RetrievalConfig,
) -> Result<Option<MatchResult>, ApiError> {
    let matches = index.query(vector, clamp_top_k(config.chat_top_k)).await?;
    let best = MatchResult::ranked(matches).into_iter().next();
    Ok(best.filter(|m| {
        let relevant = m.score >= config.min_score;
        if !relevant {
            tracing::debug!(score = m.score, min_score = config.min_score, "Best match below threshold");
        }
        relevant
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docchat_core::index::InMemoryVectorIndex;
    use docchat_core::models::MetadataTextPolicy;
    use docchat_core::{DocumentMetadata, EmbeddingError, VectorRecord};
    use uuid::Uuid;

    /// Embeds every text to the same fixed vector.
    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl EmbeddingBackend for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(self.0.clone())
        }
        fn dimensions(&self) -> usize {
            self.0.len()
        }
        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn record(values: Vec<f32>, text: &str) -> VectorRecord {
        VectorRecord {
            id: Uuid::new_v4(),
            values,
            metadata: DocumentMetadata::build(text, None, 1, MetadataTextPolicy::Full, 0),
        }
    }

    async fn seeded_index(n: usize) -> InMemoryVectorIndex {
        let index = InMemoryVectorIndex::new(2);
        let records: Vec<VectorRecord> = (0..n)
            .map(|i| record(vec![1.0, i as f32], &format!("doc {i}")))
            .collect();
        index.upsert(&records).await.unwrap();
        index
    }

    #[test]
    fn test_clamp_top_k_bounds() {
        assert_eq!(clamp_top_k(0), 1);
        assert_eq!(clamp_top_k(50), 50);
        assert_eq!(clamp_top_k(5000), MAX_TOP_K);
    }

    #[tokio::test]
    async fn test_search_rejects_blank_query() {
        let index = InMemoryVectorIndex::new(2);
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let result =
            search_documents("   ", None, &embedder, &index, &RetrievalConfig::default()).await;
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_limit_overrides_configured_top_k() {
        let index = seeded_index(10).await;
        let embedder = FixedEmbedder(vec![1.0, 0.0]);
        let config = RetrievalConfig::default();

        let all = search_documents("q", None, &embedder, &index, &config).await.unwrap();
        assert_eq!(all.count, 10);

        let three = search_documents("q", Some(3), &embedder, &index, &config).await.unwrap();
        assert_eq!(three.count, 3);
        let ranks: Vec<usize> = three.results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(three.results[0].text(), Some("doc 0"));
    }

    #[tokio::test]
    async fn test_exact_vector_is_found() {
        let index = InMemoryVectorIndex::new(2);
        let target = record(vec![0.3, 0.7], "target");
        index
            .upsert(&[record(vec![1.0, 0.0], "other"), target.clone()])
            .await
            .unwrap();

        let embedder = FixedEmbedder(vec![0.3, 0.7]);
        let response = search_documents("q", Some(1), &embedder, &index, &RetrievalConfig::default())
            .await
            .unwrap();
        assert_eq!(response.results[0].id, target.id.to_string());
    }

    #[tokio::test]
    async fn test_nearest_document_honours_min_score() {
        let index = InMemoryVectorIndex::new(2);
        index.upsert(&[record(vec![0.0, 1.0], "orthogonal")]).await.unwrap();

        let mut config = RetrievalConfig::default();
        assert!(nearest_document(&[1.0, 0.0], &index, &config).await.unwrap().is_some());

        config.min_score = 0.5;
        assert!(nearest_document(&[1.0, 0.0], &index, &config).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nearest_document_empty_index() {
        let index = InMemoryVectorIndex::new(2);
        let found = nearest_document(&[1.0, 0.0], &index, &RetrievalConfig::default())
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
