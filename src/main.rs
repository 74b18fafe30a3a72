//! # learnfeed CLI
//!
//! The `learnfeed` binary drives the ingestion and digest pipelines from
//! the command line.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `learnfeed init` | Create the SQLite database and run schema migrations |
//! | `learnfeed sources` | List registered sources and their health |
//! | `learnfeed add-source <url>` | Register an RSS feed for the learner |
//! | `learnfeed remove-source <id>` | Deactivate a source |
//! | `learnfeed ingest <source-id\|all>` | Fetch, chunk, and embed new content |
//! | `learnfeed digest` | Generate (or read back) today's digest |
//!
//! All commands accept `--config` pointing to a TOML configuration file;
//! see `config/learnfeed.example.toml`. API keys come from the
//! environment: `OPENAI_API_KEY` for embeddings, `ANTHROPIC_API_KEY` for
//! synthesis.

use anyhow::{bail, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use learnfeed::chunk::TextChunker;
use learnfeed::config::{load_config, Config};
use learnfeed::db;
use learnfeed::digest::{DigestGenerator, DigestSettings};
use learnfeed::embedding::OpenAiEmbeddings;
use learnfeed::evaluate::LexicalEvaluator;
use learnfeed::feed::RssFetcher;
use learnfeed::ingest::IngestionCoordinator;
use learnfeed::migrate;
use learnfeed::models::{Source, SourceKind};
use learnfeed::store::{SqliteStore, Store};
use learnfeed::synthesis::ClaudeSynthesizer;

#[derive(Parser)]
#[command(
    name = "learnfeed",
    about = "Feed ingestion and personalized learning digests",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/learnfeed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// List registered sources with priority, health, and activity.
    Sources,

    /// Register an RSS feed source for the configured learner.
    AddSource {
        /// Feed URL.
        url: String,

        /// Display title for the source.
        #[arg(long)]
        title: Option<String>,

        /// Priority 1 (lowest) to 5 (highest trust).
        #[arg(long, default_value_t = 3)]
        priority: i64,
    },

    /// Deactivate a source. Its content stays searchable.
    RemoveSource {
        /// Source id as shown by `sources`.
        id: String,
    },

    /// Ingest new content from one source or from all active sources.
    Ingest {
        /// Source id, or `all`.
        source: String,
    },

    /// Generate the learner's digest for a date (default: today).
    Digest {
        /// Digest date (YYYY-MM-DD).
        #[arg(long)]
        date: Option<String>,

        /// Regenerate even if a fresh cached digest exists.
        #[arg(long)]
        force_refresh: bool,

        /// Explicit query instead of one built from learner context.
        #[arg(long)]
        query: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Sources => run_sources(&config).await,
        Commands::AddSource {
            url,
            title,
            priority,
        } => run_add_source(&config, url, title, priority).await,
        Commands::RemoveSource { id } => run_remove_source(&config, id).await,
        Commands::Ingest { source } => run_ingest(&config, source).await,
        Commands::Digest {
            date,
            force_refresh,
            query,
        } => run_digest(&config, date, force_refresh, query).await,
    }
}

async fn open_store(config: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(config).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;
    println!("initialized {}", config.db.path.display());
    Ok(())
}

async fn run_sources(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let sources = store.list_sources(&config.learner.id).await?;

    if sources.is_empty() {
        println!("No sources registered. Use `learnfeed add-source <url>`.");
        return Ok(());
    }

    println!(
        "{:<38} {:<8} {:<9} {:<7} {:<7} IDENTIFIER",
        "ID", "KIND", "PRIORITY", "ACTIVE", "HEALTH"
    );
    for source in sources {
        println!(
            "{:<38} {:<8} {:<9} {:<7} {:<7.2} {}",
            source.id,
            source.kind.as_str(),
            source.priority,
            source.active,
            source.health,
            source.identifier
        );
    }
    Ok(())
}

async fn run_add_source(
    config: &Config,
    url: String,
    title: Option<String>,
    priority: i64,
) -> Result<()> {
    if !(1..=5).contains(&priority) {
        bail!("priority must be between 1 and 5");
    }

    let store = open_store(config).await?;
    let source = Source {
        id: Uuid::new_v4().to_string(),
        learner_id: config.learner.id.clone(),
        kind: SourceKind::Feed,
        identifier: url,
        title,
        priority,
        active: true,
        health: 1.0,
        last_fetched_at: None,
        created_at: Utc::now().timestamp(),
    };
    store.add_source(&source).await?;

    println!("added source {}", source.id);
    println!("  identifier: {}", source.identifier);
    println!("  priority: {}", source.priority);
    Ok(())
}

async fn run_remove_source(config: &Config, id: String) -> Result<()> {
    let store = open_store(config).await?;
    match store.get_source(&id).await? {
        Some(_) => {
            store.set_source_active(&id, false).await?;
            println!("deactivated source {}", id);
            Ok(())
        }
        None => bail!("Source not found: {}", id),
    }
}

async fn run_ingest(config: &Config, source: String) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Ingestion requires embeddings. Set [embedding] provider in config.");
    }

    let store = open_store(config).await?;
    let embeddings = Arc::new(OpenAiEmbeddings::new(&config.embedding)?);
    let fetcher = Arc::new(RssFetcher::new(30)?);
    let chunker = TextChunker::new(
        config.chunking.chunk_size,
        config.chunking.overlap,
        config.chunking.min_chunk_size,
    );
    let coordinator = IngestionCoordinator::new(
        store,
        fetcher,
        embeddings,
        chunker,
        config.embedding.batch_size,
    );

    if source == "all" {
        let summary = coordinator.ingest_all_active(&config.learner.id).await?;
        println!("ingest all");
        println!("  sources processed: {}", summary.sources_processed);
        println!("  sources failed: {}", summary.sources_failed);
        println!("  sources skipped: {}", summary.sources_skipped);
        print_stats(&summary.stats);
    } else {
        let stats = coordinator.ingest_source(&source).await?;
        println!("ingest {}", source);
        print_stats(&stats);
    }
    println!("ok");
    Ok(())
}

fn print_stats(stats: &learnfeed::ingest::IngestStats) {
    println!("  articles seen: {}", stats.articles_seen);
    println!("  articles ingested: {}", stats.articles_ingested);
    println!("  chunks created: {}", stats.chunks_created);
    println!("  duplicates skipped: {}", stats.duplicates_skipped);
    println!("  embed failures: {}", stats.embed_failed);
}

async fn run_digest(
    config: &Config,
    date: Option<String>,
    force_refresh: bool,
    query: Option<String>,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Digest generation requires embeddings. Set [embedding] provider in config.");
    }
    if !config.synthesis.is_enabled() {
        bail!("Digest generation requires synthesis. Set [synthesis] provider in config.");
    }

    let date = match date {
        Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")?,
        None => Utc::now().date_naive(),
    };

    let store = open_store(config).await?;
    let generator = DigestGenerator::new(
        store,
        Arc::new(OpenAiEmbeddings::new(&config.embedding)?),
        Arc::new(ClaudeSynthesizer::new(&config.synthesis)?),
        Arc::new(LexicalEvaluator),
        DigestSettings::from_config(config),
    );

    let ctx = config.learner.context();
    let digest = generator
        .get_or_generate(
            &config.learner.id,
            &ctx,
            date,
            force_refresh,
            query.as_deref(),
        )
        .await?;

    println!("digest {} ({})", digest.date, digest.learner_id);
    println!(
        "  quality: faithfulness {:.2} / precision {:.2} / recall {:.2} — {}",
        digest.scores.faithfulness,
        digest.scores.context_precision,
        digest.scores.context_recall,
        if digest.passed_gate {
            "passed"
        } else {
            "BELOW THRESHOLD"
        }
    );
    println!(
        "  {} insights from {} chunks across {} sources",
        digest.insights.len(),
        digest.chunk_count,
        digest.source_count
    );

    for (i, insight) in digest.insights.iter().enumerate() {
        println!();
        println!("{}. {}", i + 1, insight.title);
        if !insight.relevance.is_empty() {
            println!("   why: {}", insight.relevance);
        }
        println!("   {}", insight.explanation);
        println!("   do next: {}", insight.takeaway);
        println!(
            "   source: {} — {}",
            insight.source.title, insight.source.url
        );
    }

    if digest.insights.is_empty() {
        println!();
        println!("No relevant content found. Ingest more sources and retry.");
    }
    Ok(())
}
