//! # learnfeed
//!
//! A feed-ingesting retrieval and synthesis engine for personalized
//! learning digests.
//!
//! learnfeed periodically pulls articles from a learner's registered
//! feeds, indexes them as embedded chunks, and on demand produces a small
//! set of quality-gated insights by retrieving relevant chunks, ranking
//! them with a hybrid score, and synthesizing explanations through a
//! generative model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────┐   ┌───────────┐
//! │  Feeds   │──▶│     Ingestion     │──▶│  SQLite   │
//! │  (RSS)   │   │ dedup+chunk+embed │   │  vectors  │
//! └──────────┘   └───────────────────┘   └─────┬─────┘
//!                                              │
//!                ┌─────────────────────────────┘
//!                ▼
//!          ┌───────────┐   ┌─────────────┐   ┌──────────────┐
//!          │ Retriever │──▶│ Synthesizer │──▶│ Quality gate │──▶ Digest
//!          │ (hybrid)  │   │  (Claude)   │   │ (eval+retry) │    cache
//!          └───────────┘   └─────────────┘   └──────────────┘
//! ```
//!
//! Ingestion and digest generation run on independent schedules; they
//! share nothing but the chunk store.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`fingerprint`] | Content fingerprinting for deduplication |
//! | [`chunk`] | Sentence-respecting overlapping chunker |
//! | [`score`] | Pure ranking and health formulas |
//! | [`embedding`] | Embedding gateway abstraction |
//! | [`synthesis`] | Insight synthesis abstraction |
//! | [`evaluate`] | Faithfulness / precision / recall evaluation |
//! | [`gate`] | Quality gate and retry controller |
//! | [`query`] | Retrieval-query construction from learner context |
//! | [`retrieve`] | Hybrid-scored vector retrieval |
//! | [`digest`] | Digest cache manager |
//! | [`ingest`] | Ingestion coordinator |
//! | [`feed`] | Feed fetching (RSS) |
//! | [`store`] | Storage backends (SQLite, in-memory) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod digest;
pub mod embedding;
pub mod evaluate;
pub mod feed;
pub mod fingerprint;
pub mod gate;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod query;
pub mod retrieve;
pub mod score;
pub mod store;
pub mod synthesis;
