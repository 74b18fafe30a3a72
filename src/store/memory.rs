//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::Mutex`. Vector search is
//! brute-force cosine similarity over all stored vectors.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ContentItem, Digest, RetrievalResult, Source};
use crate::score;

use super::Store;

#[derive(Default)]
struct Inner {
    sources: HashMap<String, Source>,
    content: HashMap<String, ContentItem>,
    chunks: Vec<Chunk>,
    vectors: HashMap<String, Vec<f32>>,
    digests: HashMap<(String, String), Digest>,
}

/// In-memory store for tests and examples.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn add_source(&self, source: &Source) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sources.insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.sources.get(id).cloned())
    }

    async fn list_sources(&self, learner_id: &str) -> Result<Vec<Source>> {
        let inner = self.inner.lock().unwrap();
        let mut sources: Vec<Source> = inner
            .sources
            .values()
            .filter(|s| s.learner_id == learner_id)
            .cloned()
            .collect();
        sources.sort_by_key(|s| s.created_at);
        Ok(sources)
    }

    async fn set_source_active(&self, id: &str, active: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(source) = inner.sources.get_mut(id) {
            source.active = active;
        }
        Ok(())
    }

    async fn update_source_health(&self, id: &str, success: bool, fetched_at: i64) -> Result<f64> {
        let mut inner = self.inner.lock().unwrap();
        let source = inner
            .sources
            .get_mut(id)
            .ok_or_else(|| anyhow::anyhow!("Source not found: {}", id))?;
        source.health = score::updated_health(source.health, success);
        source.last_fetched_at = Some(fetched_at);
        Ok(source.health)
    }

    async fn insert_content_if_absent(&self, item: &ContentItem) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner
            .content
            .values()
            .any(|c| c.fingerprint == item.fingerprint || c.url == item.url);
        if duplicate {
            return Ok(false);
        }
        inner.content.insert(item.id.clone(), item.clone());
        Ok(true)
    }

    async fn remove_content(&self, content_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.content.remove(content_id);
        let orphaned: Vec<String> = inner
            .chunks
            .iter()
            .filter(|c| c.content_id == content_id)
            .map(|c| c.id.clone())
            .collect();
        inner.chunks.retain(|c| c.content_id != content_id);
        for chunk_id in orphaned {
            inner.vectors.remove(&chunk_id);
        }
        Ok(())
    }

    async fn content_count(&self) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.content.len() as i64)
    }

    async fn insert_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "Chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let mut inner = self.inner.lock().unwrap();
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            inner.chunks.push(chunk.clone());
            inner.vectors.insert(chunk.id.clone(), vector.clone());
        }
        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        similarity_floor: f64,
        match_count: i64,
        learner_id: Option<&str>,
    ) -> Result<Vec<RetrievalResult>> {
        let inner = self.inner.lock().unwrap();

        let mut candidates: Vec<RetrievalResult> = inner
            .chunks
            .iter()
            .filter_map(|chunk| {
                let content = inner.content.get(&chunk.content_id)?;
                let source = inner.sources.get(&content.source_id)?;
                if !source.active {
                    return None;
                }
                if let Some(learner) = learner_id {
                    if source.learner_id != learner {
                        return None;
                    }
                }
                let vector = inner.vectors.get(&chunk.id)?;
                let similarity = cosine_similarity(query_vec, vector) as f64;
                if similarity < similarity_floor {
                    return None;
                }
                Some(RetrievalResult {
                    chunk_id: chunk.id.clone(),
                    content_id: content.id.clone(),
                    source_id: source.id.clone(),
                    text: chunk.text.clone(),
                    title: content.title.clone(),
                    author: content.author.clone(),
                    url: content.url.clone(),
                    published_at: content.published_at,
                    source_priority: source.priority,
                    similarity,
                    combined_score: 0.0,
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(match_count as usize);
        Ok(candidates)
    }

    async fn upsert_digest(&self, digest: &Digest) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.digests.insert(
            (digest.learner_id.clone(), digest.date.clone()),
            digest.clone(),
        );
        Ok(())
    }

    async fn get_fresh_digest(
        &self,
        learner_id: &str,
        date: &str,
        now: i64,
    ) -> Result<Option<Digest>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .digests
            .get(&(learner_id.to_string(), date.to_string()))
            .filter(|d| d.expires_at > now)
            .cloned())
    }
}
