use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Sources registered per learner
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id TEXT PRIMARY KEY,
            learner_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            identifier TEXT NOT NULL,
            title TEXT,
            priority INTEGER NOT NULL DEFAULT 3,
            active INTEGER NOT NULL DEFAULT 1,
            health REAL NOT NULL DEFAULT 1.0,
            last_fetched_at INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(learner_id, identifier)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ingested articles, unique per fingerprint and per URL
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS content (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            title TEXT NOT NULL,
            author TEXT,
            url TEXT NOT NULL,
            published_at INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(fingerprint),
            UNIQUE(url),
            FOREIGN KEY (source_id) REFERENCES sources(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunks with contiguous per-content sequence indices
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            text TEXT NOT NULL,
            token_estimate INTEGER NOT NULL,
            has_code INTEGER NOT NULL DEFAULT 0,
            UNIQUE(content_id, seq),
            FOREIGN KEY (content_id) REFERENCES content(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding vectors, one per chunk, little-endian f32 BLOBs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Generated digests, one row per (learner, date)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS digests (
            learner_id TEXT NOT NULL,
            digest_date TEXT NOT NULL,
            insights_json TEXT NOT NULL,
            scores_json TEXT NOT NULL,
            passed_gate INTEGER NOT NULL,
            query TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            source_count INTEGER NOT NULL,
            avg_similarity REAL NOT NULL,
            generated_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (learner_id, digest_date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_content_id ON chunks(content_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_content_source_id ON content(source_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_content_published_at ON content(published_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_learner ON sources(learner_id)")
        .execute(pool)
        .await?;

    Ok(())
}
