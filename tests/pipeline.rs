//! End-to-end pipeline tests over the in-memory store with deterministic
//! collaborator stand-ins: ingest → retrieve → synthesize → gate → cache.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use learnfeed::chunk::TextChunker;
use learnfeed::digest::{DigestGenerator, DigestSettings};
use learnfeed::embedding::EmbeddingClient;
use learnfeed::evaluate::LexicalEvaluator;
use learnfeed::feed::FeedFetcher;
use learnfeed::ingest::IngestionCoordinator;
use learnfeed::models::{
    Article, Insight, LearnerContext, RetrievalResult, Source, SourceAttribution, SourceKind,
};
use learnfeed::store::{MemoryStore, Store};
use learnfeed::synthesis::Synthesizer;

// ============ Stand-ins ============

/// Every text embeds to the same unit vector, so every chunk matches every
/// query with similarity 1.0.
struct UniformEmbeddings;

#[async_trait]
impl EmbeddingClient for UniformEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dims(&self) -> usize {
        2
    }
}

/// Serves a fixed list of articles.
struct FixedFetcher {
    articles: Vec<Article>,
}

#[async_trait]
impl FeedFetcher for FixedFetcher {
    async fn fetch(&self, _source: &Source, _since: Option<DateTime<Utc>>) -> Result<Vec<Article>> {
        Ok(self.articles.clone())
    }
}

/// Copies the top-ranked chunk's text verbatim into the insight, which
/// makes the lexical evaluator score it as perfectly faithful.
struct EchoSynthesizer {
    calls: AtomicU32,
}

impl EchoSynthesizer {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(
        &self,
        _query: &str,
        chunks: &[RetrievalResult],
        _ctx: &LearnerContext,
        _insight_count: usize,
        _strict: bool,
    ) -> Result<Vec<Insight>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let top = &chunks[0];
        Ok(vec![Insight {
            title: top.title.clone(),
            relevance: "Matches the current study focus".to_string(),
            explanation: top.text.clone(),
            takeaway: top.text.clone(),
            source: SourceAttribution {
                title: top.title.clone(),
                author: top.author.clone(),
                url: top.url.clone(),
            },
        }])
    }
}

// ============ Fixtures ============

fn feed_source(id: &str) -> Source {
    Source {
        id: id.to_string(),
        learner_id: "l1".to_string(),
        kind: SourceKind::Feed,
        identifier: format!("https://example.com/{}.xml", id),
        title: Some("Example Feed".to_string()),
        priority: 4,
        active: true,
        health: 1.0,
        last_fetched_at: None,
        created_at: Utc::now().timestamp(),
    }
}

fn article(url: &str, text: &str) -> Article {
    Article {
        title: "Attention in Transformers".to_string(),
        author: Some("Vaswani".to_string()),
        url: url.to_string(),
        published_at: Some(Utc::now()),
        text: text.to_string(),
    }
}

/// 400 five-word sentences, 2,000 words, ~5 estimated tokens each — sized
/// so the default 750/100 chunker produces exactly three chunks.
fn two_thousand_words() -> String {
    (0..400)
        .map(|i| format!("{:03} bcd efg hij klm.", i))
        .collect::<Vec<_>>()
        .join(" ")
}

/// An article whose every sentence shares vocabulary with the test query.
fn attention_article() -> String {
    (0..120)
        .map(|i| {
            format!(
                "Attention mechanisms let transformer models weigh context tokens in pass {}.",
                i
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn coordinator(store: Arc<MemoryStore>, articles: Vec<Article>) -> IngestionCoordinator {
    IngestionCoordinator::new(
        store,
        Arc::new(FixedFetcher { articles }),
        Arc::new(UniformEmbeddings),
        TextChunker::new(750, 100, 100),
        64,
    )
}

fn generator(store: Arc<MemoryStore>, synth: Arc<EchoSynthesizer>) -> DigestGenerator {
    DigestGenerator::new(
        store,
        Arc::new(UniformEmbeddings),
        synth,
        Arc::new(LexicalEvaluator),
        DigestSettings::default(),
    )
}

fn bare_context() -> LearnerContext {
    LearnerContext {
        topics: vec![],
        difficulty: String::new(),
        goal: String::new(),
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 11, 3).unwrap()
}

// ============ Scenarios ============

#[tokio::test]
async fn test_two_thousand_word_article_yields_three_chunks() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(&feed_source("s1")).await.unwrap();

    let coordinator = coordinator(
        Arc::clone(&store),
        vec![article("https://example.com/long", &two_thousand_words())],
    );
    let stats = coordinator.ingest_source("s1").await.unwrap();

    assert_eq!(stats.articles_ingested, 1);
    assert_eq!(stats.chunks_created, 3);
}

#[tokio::test]
async fn test_identical_text_ingested_once() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(&feed_source("s1")).await.unwrap();

    let text = attention_article();
    // Same normalized text under two URLs: a mirror, not new content.
    let coordinator = coordinator(
        Arc::clone(&store),
        vec![
            article("https://example.com/original", &text),
            article("https://mirror.example.org/copy", &text),
        ],
    );
    let stats = coordinator.ingest_source("s1").await.unwrap();

    assert_eq!(stats.articles_ingested, 1);
    assert_eq!(stats.duplicates_skipped, 1);
    assert_eq!(store.content_count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_concurrent_ingestion_of_same_article_single_row() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(&feed_source("a")).await.unwrap();
    store.add_source(&feed_source("b")).await.unwrap();

    let text = attention_article();
    let first = coordinator(
        Arc::clone(&store),
        vec![article("https://example.com/x", &text)],
    );
    let second = coordinator(
        Arc::clone(&store),
        vec![article("https://example.com/x", &text)],
    );

    let (a, b) = tokio::join!(first.ingest_source("a"), second.ingest_source("b"));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(store.content_count().await.unwrap(), 1);
    assert_eq!(a.articles_ingested + b.articles_ingested, 1);
    assert_eq!(a.duplicates_skipped + b.duplicates_skipped, 1);
}

#[tokio::test]
async fn test_full_pipeline_ingest_to_passing_digest() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(&feed_source("s1")).await.unwrap();

    coordinator(
        Arc::clone(&store),
        vec![article("https://example.com/attention", &attention_article())],
    )
    .ingest_source("s1")
    .await
    .unwrap();

    let synth = Arc::new(EchoSynthesizer::new());
    let generator = generator(Arc::clone(&store), Arc::clone(&synth));

    let digest = generator
        .get_or_generate(
            "l1",
            &bare_context(),
            date(),
            false,
            Some("attention mechanisms weigh transformer context tokens"),
        )
        .await
        .unwrap();

    assert!(digest.passed_gate, "scores: {:?}", digest.scores);
    assert_eq!(digest.insights.len(), 1);
    assert_eq!(digest.insights[0].source.url, "https://example.com/attention");
    assert_eq!(digest.source_count, 1);
    assert!(digest.chunk_count >= 1);
    assert!(digest.avg_similarity > 0.99);
    assert_eq!(synth.calls(), 1);

    // Second request is served from the cache.
    let again = generator
        .get_or_generate(
            "l1",
            &bare_context(),
            date(),
            false,
            Some("attention mechanisms weigh transformer context tokens"),
        )
        .await
        .unwrap();
    assert_eq!(synth.calls(), 1);
    assert_eq!(again.generated_at, digest.generated_at);
}

#[tokio::test]
async fn test_digest_with_nothing_ingested_is_empty_not_error() {
    let store = Arc::new(MemoryStore::new());
    let synth = Arc::new(EchoSynthesizer::new());
    let generator = generator(Arc::clone(&store), Arc::clone(&synth));

    let digest = generator
        .get_or_generate("l1", &bare_context(), date(), false, Some("anything"))
        .await
        .unwrap();

    assert!(digest.insights.is_empty());
    assert_eq!(digest.scores.mean(), 0.0);
    assert!(!digest.passed_gate);
    assert_eq!(synth.calls(), 0);
}

#[tokio::test]
async fn test_force_refresh_overwrites_cached_digest() {
    let store = Arc::new(MemoryStore::new());
    store.add_source(&feed_source("s1")).await.unwrap();

    coordinator(
        Arc::clone(&store),
        vec![article("https://example.com/attention", &attention_article())],
    )
    .ingest_source("s1")
    .await
    .unwrap();

    let synth = Arc::new(EchoSynthesizer::new());
    let generator = generator(Arc::clone(&store), Arc::clone(&synth));
    let query = Some("attention mechanisms weigh transformer context tokens");

    generator
        .get_or_generate("l1", &bare_context(), date(), false, query)
        .await
        .unwrap();
    let refreshed = generator
        .get_or_generate("l1", &bare_context(), date(), true, query)
        .await
        .unwrap();

    assert_eq!(synth.calls(), 2, "force_refresh must regenerate");

    let cached = store
        .get_fresh_digest("l1", "2025-11-03", Utc::now().timestamp())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.generated_at, refreshed.generated_at);
}
