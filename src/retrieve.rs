//! Hybrid-scored vector retrieval.
//!
//! The retriever embeds the query, overfetches similarity candidates from
//! storage, then re-ranks them with the combined score from [`crate::score`]
//! before truncating to `top_k`. An empty result set is a valid outcome and
//! is distinct from a retrieval failure (embedding service unavailable),
//! which propagates as an error.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use crate::embedding::{embed_query, EmbeddingClient};
use crate::models::RetrievalResult;
use crate::score;
use crate::store::Store;

pub struct HybridRetriever {
    store: Arc<dyn Store>,
    embeddings: Arc<dyn EmbeddingClient>,
    overfetch_factor: i64,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: Arc<dyn EmbeddingClient>,
        overfetch_factor: i64,
    ) -> Self {
        Self {
            store,
            embeddings,
            overfetch_factor: overfetch_factor.max(1),
        }
    }

    /// Retrieve the `top_k` best chunks for a query.
    ///
    /// Candidates come back from storage ordered by raw similarity; the
    /// combined score re-orders them so fresh, high-priority sources can
    /// overtake stale near-duplicates of the query.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: i64,
        similarity_floor: f64,
        learner_id: Option<&str>,
    ) -> Result<Vec<RetrievalResult>> {
        let query_vec = embed_query(self.embeddings.as_ref(), query)
            .await
            .context("Query embedding failed")?;

        let mut candidates = self
            .store
            .similarity_search(
                &query_vec,
                similarity_floor,
                top_k * self.overfetch_factor,
                learner_id,
            )
            .await
            .context("Similarity search failed")?;

        if candidates.is_empty() {
            info!(query_len = query.len(), "no chunks above similarity floor");
            return Ok(Vec::new());
        }

        let now = Utc::now().timestamp();
        for candidate in &mut candidates {
            let age_days = (now - candidate.published_at).max(0) as f64 / 86_400.0;
            candidate.combined_score = score::combined_score(
                candidate.similarity,
                age_days,
                candidate.source_priority,
            );
        }

        candidates.sort_by(|a, b| {
            b.combined_score
                .partial_cmp(&a.combined_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.similarity
                        .partial_cmp(&a.similarity)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(b.published_at.cmp(&a.published_at))
        });
        candidates.truncate(top_k as usize);

        debug!(
            count = candidates.len(),
            top = candidates.first().map(|c| c.combined_score),
            "retrieval re-ranked"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ContentItem, Source, SourceKind};
    use crate::store::MemoryStore;
    use anyhow::bail;
    use async_trait::async_trait;

    /// Deterministic embeddings: the first component encodes identity, so
    /// cosine similarity against a query vector is controlled per chunk.
    struct StubEmbeddings {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingClient for StubEmbeddings {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                bail!("embedding service unavailable");
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dims(&self) -> usize {
            2
        }
    }

    /// Build a unit vector whose cosine similarity to `[1, 0]` is `sim`.
    fn vector_with_similarity(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).max(0.0).sqrt()]
    }

    async fn seed_chunk(
        store: &MemoryStore,
        id: &str,
        similarity: f32,
        age_days: i64,
        priority: i64,
    ) {
        let now = Utc::now().timestamp();
        let source = Source {
            id: format!("src-{}", id),
            learner_id: "l1".to_string(),
            kind: SourceKind::Feed,
            identifier: format!("https://example.com/{}.xml", id),
            title: None,
            priority,
            active: true,
            health: 1.0,
            last_fetched_at: None,
            created_at: 0,
        };
        store.add_source(&source).await.unwrap();

        let content = ContentItem {
            id: format!("content-{}", id),
            source_id: source.id.clone(),
            title: format!("Article {}", id),
            author: None,
            url: format!("https://example.com/{}", id),
            published_at: now - age_days * 86_400,
            fingerprint: format!("fp-{}", id),
            raw_text: "text".to_string(),
            created_at: now,
        };
        store.insert_content_if_absent(&content).await.unwrap();

        let chunk = Chunk {
            id: format!("chunk-{}", id),
            content_id: content.id.clone(),
            seq: 0,
            text: format!("chunk text {}", id),
            token_estimate: 3,
            has_code: false,
        };
        store
            .insert_chunks(&[chunk], &[vector_with_similarity(similarity)])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_fresh_high_priority_outranks_stale_near_match() {
        let store = Arc::new(MemoryStore::new());
        // Similarity 0.95, 30 days old, priority 1 → combined 0.59.
        seed_chunk(&store, "stale", 0.95, 30, 1).await;
        // Similarity 0.72, fresh, priority 5 → combined 0.832.
        seed_chunk(&store, "fresh", 0.72, 0, 5).await;

        let retriever = HybridRetriever::new(
            store,
            Arc::new(StubEmbeddings { fail: false }),
            2,
        );
        let results = retriever
            .retrieve("query", 10, 0.70, Some("l1"))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "chunk-fresh");
        assert_eq!(results[1].chunk_id, "chunk-stale");
        assert!((results[0].combined_score - 0.832).abs() < 1e-3);
        assert!((results[1].combined_score - 0.59).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_similarity_floor_filters() {
        let store = Arc::new(MemoryStore::new());
        seed_chunk(&store, "close", 0.9, 0, 3).await;
        seed_chunk(&store, "far", 0.4, 0, 3).await;

        let retriever = HybridRetriever::new(
            store,
            Arc::new(StubEmbeddings { fail: false }),
            2,
        );
        let results = retriever
            .retrieve("query", 10, 0.70, Some("l1"))
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, "chunk-close");
    }

    #[tokio::test]
    async fn test_truncates_to_top_k() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..8 {
            seed_chunk(&store, &format!("c{}", i), 0.9, i, 3).await;
        }

        let retriever = HybridRetriever::new(
            store,
            Arc::new(StubEmbeddings { fail: false }),
            2,
        );
        let results = retriever
            .retrieve("query", 3, 0.70, Some("l1"))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_result_is_ok_not_error() {
        let store = Arc::new(MemoryStore::new());
        let retriever = HybridRetriever::new(
            store,
            Arc::new(StubEmbeddings { fail: false }),
            2,
        );
        let results = retriever.retrieve("query", 5, 0.70, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_hard_error() {
        let store = Arc::new(MemoryStore::new());
        seed_chunk(&store, "c", 0.9, 0, 3).await;

        let retriever =
            HybridRetriever::new(store, Arc::new(StubEmbeddings { fail: true }), 2);
        assert!(retriever.retrieve("query", 5, 0.70, None).await.is_err());
    }

    #[tokio::test]
    async fn test_ties_broken_by_similarity() {
        let store = Arc::new(MemoryStore::new());
        // Same combined score is impossible to force exactly with distinct
        // inputs here, so verify the comparator directly on equal combined:
        // higher similarity first.
        seed_chunk(&store, "a", 0.8, 0, 3).await;
        seed_chunk(&store, "b", 0.8, 0, 3).await;

        let retriever = HybridRetriever::new(
            store,
            Arc::new(StubEmbeddings { fail: false }),
            2,
        );
        let results = retriever
            .retrieve("query", 10, 0.70, Some("l1"))
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].combined_score >= results[1].combined_score);
    }
}
