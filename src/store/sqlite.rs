//! SQLite-backed [`Store`] implementation.
//!
//! Embedding vectors are stored as little-endian f32 BLOBs; similarity is
//! computed in Rust over the candidate rows. Fingerprint and URL
//! uniqueness are enforced by the schema, which makes
//! [`insert_content_if_absent`](Store::insert_content_if_absent) race-safe
//! under concurrent ingestion.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, ContentItem, Digest, QualityScore, RetrievalResult, Source, SourceKind};
use crate::score;

use super::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<Source> {
    let kind_str: String = row.get("kind");
    let kind = SourceKind::parse(&kind_str)
        .ok_or_else(|| anyhow::anyhow!("Unknown source kind in database: {}", kind_str))?;
    Ok(Source {
        id: row.get("id"),
        learner_id: row.get("learner_id"),
        kind,
        identifier: row.get("identifier"),
        title: row.get("title"),
        priority: row.get("priority"),
        active: row.get("active"),
        health: row.get("health"),
        last_fetched_at: row.get("last_fetched_at"),
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn add_source(&self, source: &Source) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sources (id, learner_id, kind, identifier, title, priority, active, health, last_fetched_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.learner_id)
        .bind(source.kind.as_str())
        .bind(&source.identifier)
        .bind(&source.title)
        .bind(source.priority)
        .bind(source.active)
        .bind(source.health)
        .bind(source.last_fetched_at)
        .bind(source.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Source>> {
        let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    async fn list_sources(&self, learner_id: &str) -> Result<Vec<Source>> {
        let rows = sqlx::query("SELECT * FROM sources WHERE learner_id = ? ORDER BY created_at")
            .bind(learner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn set_source_active(&self, id: &str, active: bool) -> Result<()> {
        sqlx::query("UPDATE sources SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_source_health(&self, id: &str, success: bool, fetched_at: i64) -> Result<f64> {
        let current: Option<f64> = sqlx::query_scalar("SELECT health FROM sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let current = current.ok_or_else(|| anyhow::anyhow!("Source not found: {}", id))?;

        let health = score::updated_health(current, success);
        sqlx::query("UPDATE sources SET health = ?, last_fetched_at = ? WHERE id = ?")
            .bind(health)
            .bind(fetched_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(health)
    }

    async fn insert_content_if_absent(&self, item: &ContentItem) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO content (id, source_id, title, author, url, published_at, fingerprint, raw_text, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&item.id)
        .bind(&item.source_id)
        .bind(&item.title)
        .bind(&item.author)
        .bind(&item.url)
        .bind(item.published_at)
        .bind(&item.fingerprint)
        .bind(&item.raw_text)
        .bind(item.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_content(&self, content_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE content_id = ?)",
        )
        .bind(content_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE content_id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM content WHERE id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn content_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn insert_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "Chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, content_id, seq, text, token_estimate, has_code)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.content_id)
            .bind(chunk.seq)
            .bind(&chunk.text)
            .bind(chunk.token_estimate)
            .bind(chunk.has_code)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, content_id, embedding) VALUES (?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.content_id)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        query_vec: &[f32],
        similarity_floor: f64,
        match_count: i64,
        learner_id: Option<&str>,
    ) -> Result<Vec<RetrievalResult>> {
        let base = r#"
            SELECT cv.chunk_id, cv.embedding,
                   ch.content_id, ch.text,
                   c.title, c.author, c.url, c.published_at, c.source_id,
                   s.priority
            FROM chunk_vectors cv
            JOIN chunks ch ON ch.id = cv.chunk_id
            JOIN content c ON c.id = ch.content_id
            JOIN sources s ON s.id = c.source_id
            WHERE s.active = 1
        "#;

        let rows = match learner_id {
            Some(learner) => {
                let sql = format!("{} AND s.learner_id = ?", base);
                sqlx::query(&sql).bind(learner).fetch_all(&self.pool).await?
            }
            None => sqlx::query(base).fetch_all(&self.pool).await?,
        };

        let mut candidates: Vec<RetrievalResult> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let similarity = cosine_similarity(query_vec, &vector) as f64;
                if similarity < similarity_floor {
                    return None;
                }
                Some(RetrievalResult {
                    chunk_id: row.get("chunk_id"),
                    content_id: row.get("content_id"),
                    source_id: row.get("source_id"),
                    text: row.get("text"),
                    title: row.get("title"),
                    author: row.get("author"),
                    url: row.get("url"),
                    published_at: row.get("published_at"),
                    source_priority: row.get("priority"),
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
        let insights_json = serde_json::to_string(&digest.insights)?;
        let scores_json = serde_json::to_string(&digest.scores)?;

        sqlx::query(
            r#"
            INSERT INTO digests (learner_id, digest_date, insights_json, scores_json, passed_gate,
                                 query, chunk_count, source_count, avg_similarity, generated_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(learner_id, digest_date) DO UPDATE SET
                insights_json = excluded.insights_json,
                scores_json = excluded.scores_json,
                passed_gate = excluded.passed_gate,
                query = excluded.query,
                chunk_count = excluded.chunk_count,
                source_count = excluded.source_count,
                avg_similarity = excluded.avg_similarity,
                generated_at = excluded.generated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&digest.learner_id)
        .bind(&digest.date)
        .bind(insights_json)
        .bind(scores_json)
        .bind(digest.passed_gate)
        .bind(&digest.query)
        .bind(digest.chunk_count)
        .bind(digest.source_count)
        .bind(digest.avg_similarity)
        .bind(digest.generated_at)
        .bind(digest.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_fresh_digest(
        &self,
        learner_id: &str,
        date: &str,
        now: i64,
    ) -> Result<Option<Digest>> {
        let row = sqlx::query(
            "SELECT * FROM digests WHERE learner_id = ? AND digest_date = ? AND expires_at > ?",
        )
        .bind(learner_id)
        .bind(date)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let insights_json: String = row.get("insights_json");
        let scores_json: String = row.get("scores_json");
        let insights = serde_json::from_str(&insights_json)?;
        let scores: QualityScore = serde_json::from_str(&scores_json)?;

        Ok(Some(Digest {
            learner_id: row.get("learner_id"),
            date: row.get("digest_date"),
            insights,
            scores,
            passed_gate: row.get("passed_gate"),
            query: row.get("query"),
            chunk_count: row.get("chunk_count"),
            source_count: row.get("source_count"),
            avg_similarity: row.get("avg_similarity"),
            generated_at: row.get("generated_at"),
            expires_at: row.get("expires_at"),
        }))
    }
}
