//! Ingestion pipeline orchestration.
//!
//! Drives the flow for one source: fetch → fingerprint/dedup → chunk →
//! batch-embed → store, updating the source's health score after every
//! fetch attempt. Runs independently of digest generation; the two only
//! meet at the chunk store.
//!
//! Duplicate articles are silently skipped and counted. An article whose
//! embedding step fails is rolled back entirely — a half-ingested article
//! would break the contiguous chunk-sequence invariant and, worse, its
//! fingerprint would block the retry on the next run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::chunk::TextChunker;
use crate::embedding::EmbeddingClient;
use crate::feed::FeedFetcher;
use crate::fingerprint::fingerprint;
use crate::models::{Chunk, ContentItem, Source};
use crate::store::Store;
use uuid::Uuid;

/// Per-run ingestion counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub articles_seen: u64,
    pub articles_ingested: u64,
    pub chunks_created: u64,
    pub duplicates_skipped: u64,
    /// Articles rolled back because an embedding batch failed.
    pub embed_failed: u64,
}

impl IngestStats {
    fn absorb(&mut self, other: &IngestStats) {
        self.articles_seen += other.articles_seen;
        self.articles_ingested += other.articles_ingested;
        self.chunks_created += other.chunks_created;
        self.duplicates_skipped += other.duplicates_skipped;
        self.embed_failed += other.embed_failed;
    }
}

/// Aggregate result of a multi-source ingestion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    pub sources_processed: u64,
    pub sources_failed: u64,
    pub sources_skipped: u64,
    pub stats: IngestStats,
}

pub struct IngestionCoordinator {
    store: Arc<dyn Store>,
    fetcher: Arc<dyn FeedFetcher>,
    embeddings: Arc<dyn EmbeddingClient>,
    chunker: TextChunker,
    batch_size: usize,
}

impl IngestionCoordinator {
    pub fn new(
        store: Arc<dyn Store>,
        fetcher: Arc<dyn FeedFetcher>,
        embeddings: Arc<dyn EmbeddingClient>,
        chunker: TextChunker,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            fetcher,
            embeddings,
            chunker,
            batch_size: batch_size.max(1),
        }
    }

    /// Ingest new content for one source.
    ///
    /// Fetch failures decay the source's health and propagate as errors;
    /// per-article problems are counted and skipped so one bad article
    /// cannot sink the run.
    pub async fn ingest_source(&self, source_id: &str) -> Result<IngestStats> {
        let source = self
            .store
            .get_source(source_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Source not found: {}", source_id))?;

        if !source.active {
            info!(source = source_id, "source inactive, skipping");
            return Ok(IngestStats::default());
        }

        let since = source
            .last_fetched_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0));

        let articles = match self.fetcher.fetch(&source, since).await {
            Ok(articles) => articles,
            Err(e) => {
                let health = self
                    .store
                    .update_source_health(source_id, false, Utc::now().timestamp())
                    .await?;
                warn!(source = source_id, health, error = %e, "fetch failed");
                return Err(e).with_context(|| format!("Fetching source {}", source_id));
            }
        };

        let stats = self.process_articles(&source, articles).await?;

        self.store
            .update_source_health(source_id, true, Utc::now().timestamp())
            .await?;

        info!(
            source = source_id,
            seen = stats.articles_seen,
            ingested = stats.articles_ingested,
            chunks = stats.chunks_created,
            duplicates = stats.duplicates_skipped,
            "ingestion complete"
        );
        Ok(stats)
    }

    async fn process_articles(
        &self,
        source: &Source,
        articles: Vec<crate::models::Article>,
    ) -> Result<IngestStats> {
        let mut stats = IngestStats::default();

        for article in articles {
            stats.articles_seen += 1;

            if article.text.trim().is_empty() {
                debug!(url = %article.url, "article has no text, skipping");
                continue;
            }

            let now = Utc::now().timestamp();
            let item = ContentItem {
                id: Uuid::new_v4().to_string(),
                source_id: source.id.clone(),
                title: article.title.clone(),
                author: article.author.clone(),
                url: article.url.clone(),
                published_at: article
                    .published_at
                    .map(|dt| dt.timestamp())
                    .unwrap_or(now),
                fingerprint: fingerprint(&article.text),
                raw_text: article.text.clone(),
                created_at: now,
            };

            if !self.store.insert_content_if_absent(&item).await? {
                stats.duplicates_skipped += 1;
                debug!(url = %item.url, "duplicate content, skipping");
                continue;
            }

            let pieces = self.chunker.chunk_text(&article.text);
            if pieces.is_empty() {
                warn!(url = %item.url, "article produced no chunks");
                continue;
            }

            let chunks: Vec<Chunk> = pieces
                .iter()
                .enumerate()
                .map(|(seq, piece)| Chunk {
                    id: Uuid::new_v4().to_string(),
                    content_id: item.id.clone(),
                    seq: seq as i64,
                    text: piece.text.clone(),
                    token_estimate: piece.token_estimate as i64,
                    has_code: piece.has_code,
                })
                .collect();

            match self.embed_all(&chunks).await {
                Ok(vectors) => {
                    self.store.insert_chunks(&chunks, &vectors).await?;
                    stats.articles_ingested += 1;
                    stats.chunks_created += chunks.len() as u64;
                    debug!(url = %item.url, chunks = chunks.len(), "article ingested");
                }
                Err(e) => {
                    // Roll the article back so the next run retries it.
                    warn!(url = %item.url, error = %e, "embedding failed, rolling back article");
                    self.store.remove_content(&item.id).await?;
                    stats.embed_failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Embed chunk texts in batches. The embedding client retries
    /// transient failures internally; a batch that still fails aborts the
    /// article so no chunk is silently dropped.
    async fn embed_all(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self.embeddings.embed(batch).await?;
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }

    /// Ingest every active source for a learner. One source's failure does
    /// not abort the rest.
    pub async fn ingest_all_active(&self, learner_id: &str) -> Result<IngestSummary> {
        let sources = self.store.list_sources(learner_id).await?;
        let mut summary = IngestSummary::default();

        for source in sources {
            if !source.active {
                summary.sources_skipped += 1;
                continue;
            }
            match self.ingest_source(&source.id).await {
                Ok(stats) => {
                    summary.sources_processed += 1;
                    summary.stats.absorb(&stats);
                }
                Err(e) => {
                    summary.sources_failed += 1;
                    warn!(source = %source.id, error = %e, "source ingestion failed");
                }
            }
        }

        info!(
            learner = learner_id,
            processed = summary.sources_processed,
            failed = summary.sources_failed,
            articles = summary.stats.articles_ingested,
            chunks = summary.stats.chunks_created,
            "ingestion run complete"
        );
        Ok(summary)
    }
}
