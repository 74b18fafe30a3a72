//! Storage abstraction for learnfeed.
//!
//! The [`Store`] trait defines every persistence operation the ingestion
//! and digest pipelines need, enabling pluggable backends. The SQLite
//! implementation is the production backend; the in-memory implementation
//! backs tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, ContentItem, Digest, RetrievalResult, Source};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add_source`](Store::add_source) | Register a content source |
/// | [`get_source`](Store::get_source) / [`list_sources`](Store::list_sources) | Read back sources |
/// | [`set_source_active`](Store::set_source_active) | Deactivate without deleting |
/// | [`update_source_health`](Store::update_source_health) | Record a fetch outcome |
/// | [`insert_content_if_absent`](Store::insert_content_if_absent) | Race-safe dedup insert |
/// | [`remove_content`](Store::remove_content) | Compensate a failed ingestion |
/// | [`insert_chunks`](Store::insert_chunks) | Persist chunks with their vectors |
/// | [`similarity_search`](Store::similarity_search) | Vector query joined with metadata |
/// | [`upsert_digest`](Store::upsert_digest) | Atomic replace of a digest |
/// | [`get_fresh_digest`](Store::get_fresh_digest) | Read a non-expired digest |
#[async_trait]
pub trait Store: Send + Sync {
    /// Register a new source.
    async fn add_source(&self, source: &Source) -> Result<()>;

    /// Fetch one source by id.
    async fn get_source(&self, id: &str) -> Result<Option<Source>>;

    /// All sources registered for a learner, active or not.
    async fn list_sources(&self, learner_id: &str) -> Result<Vec<Source>>;

    /// Activate or deactivate a source. Sources referenced by content are
    /// never hard-deleted.
    async fn set_source_active(&self, id: &str, active: bool) -> Result<()>;

    /// Apply the health formula for one fetch attempt and record the
    /// attempt time. Returns the new health score.
    async fn update_source_health(&self, id: &str, success: bool, fetched_at: i64) -> Result<f64>;

    /// Insert a content item unless its fingerprint or URL already exists.
    ///
    /// Returns `true` if the row was inserted, `false` on a duplicate.
    /// Concurrent inserts of the same article resolve to exactly one row.
    async fn insert_content_if_absent(&self, item: &ContentItem) -> Result<bool>;

    /// Delete a content item and its chunks. Used to roll back an article
    /// whose embedding step failed, so a later run can retry it.
    async fn remove_content(&self, content_id: &str) -> Result<()>;

    /// Total number of stored content items.
    async fn content_count(&self) -> Result<i64>;

    /// Persist chunks and their embedding vectors, positionally aligned.
    async fn insert_chunks(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()>;

    /// Vector similarity query joined with owning content and source
    /// metadata. Restricted to chunks of active sources, optionally
    /// filtered by learner; results at or above `similarity_floor`,
    /// ordered by similarity descending, at most `match_count` rows.
    async fn similarity_search(
        &self,
        query_vec: &[f32],
        similarity_floor: f64,
        match_count: i64,
        learner_id: Option<&str>,
    ) -> Result<Vec<RetrievalResult>>;

    /// Insert or replace the digest for its `(learner, date)` key. The
    /// write is atomic — readers never observe a partial digest.
    async fn upsert_digest(&self, digest: &Digest) -> Result<()>;

    /// Read the digest for `(learner, date)` if one exists and has not
    /// expired as of `now`.
    async fn get_fresh_digest(
        &self,
        learner_id: &str,
        date: &str,
        now: i64,
    ) -> Result<Option<Digest>>;
}
