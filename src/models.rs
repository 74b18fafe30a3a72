//! Core data models used throughout learnfeed.
//!
//! These types represent the sources, content items, chunks, and synthesis
//! artifacts that flow through the ingestion and digest pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a registered content source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// An RSS/Atom feed URL.
    Feed,
    /// A social/platform handle resolved to a feed elsewhere.
    Handle,
    /// A custom source driven by an external fetcher.
    Custom,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Handle => "handle",
            SourceKind::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feed" => Some(SourceKind::Feed),
            "handle" => Some(SourceKind::Handle),
            "custom" => Some(SourceKind::Custom),
            _ => None,
        }
    }
}

/// A registered content source for one learner.
///
/// Health starts at 1.0 and is adjusted after every fetch attempt; priority
/// is a 1–5 scale where 5 is most trusted. Sources are deactivated rather
/// than deleted while content still references them.
#[derive(Debug, Clone)]
pub struct Source {
    pub id: String,
    pub learner_id: String,
    pub kind: SourceKind,
    /// Feed URL or handle, depending on `kind`.
    pub identifier: String,
    pub title: Option<String>,
    pub priority: i64,
    pub active: bool,
    pub health: f64,
    pub last_fetched_at: Option<i64>,
    pub created_at: i64,
}

/// A raw article produced by a feed fetcher, before ingestion.
#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
    pub author: Option<String>,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub text: String,
}

/// One ingested article. Immutable after insertion; unique per content
/// fingerprint and per URL.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: String,
    pub source_id: String,
    pub title: String,
    pub author: Option<String>,
    pub url: String,
    pub published_at: i64,
    pub fingerprint: String,
    pub raw_text: String,
    pub created_at: i64,
}

/// An ordered slice of a content item's text plus embedding metadata.
///
/// Sequence indices are contiguous and gap-free per content item.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub content_id: String,
    pub seq: i64,
    pub text: String,
    pub token_estimate: i64,
    pub has_code: bool,
}

/// A retrieval candidate: a chunk joined with its owning content and source
/// metadata. Transient — exists only for one digest-generation invocation.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub content_id: String,
    pub source_id: String,
    pub text: String,
    pub title: String,
    pub author: Option<String>,
    pub url: String,
    pub published_at: i64,
    pub source_priority: i64,
    /// Raw cosine similarity from the vector query, in [0, 1] for
    /// normalized embeddings.
    pub similarity: f64,
    /// Combined hybrid score, attached by the retriever during re-ranking.
    pub combined_score: f64,
}

/// The learner's current study state. Supplied externally; read-only here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LearnerContext {
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default)]
    pub goal: String,
}

fn default_difficulty() -> String {
    "intermediate".to_string()
}

/// Attribution for the content item an insight was drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub url: String,
}

/// One synthesized explanation. Immutable once evaluated and accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    /// Why this insight matters for the learner's current focus.
    pub relevance: String,
    pub explanation: String,
    /// One immediately actionable item.
    pub takeaway: String,
    pub source: SourceAttribution,
}

/// Three independent quality metrics in [0, 1], computed fresh per
/// synthesis attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub faithfulness: f64,
    pub context_precision: f64,
    pub context_recall: f64,
}

impl QualityScore {
    pub fn zero() -> Self {
        Self {
            faithfulness: 0.0,
            context_precision: 0.0,
            context_recall: 0.0,
        }
    }

    pub fn mean(&self) -> f64 {
        (self.faithfulness + self.context_precision + self.context_recall) / 3.0
    }
}

/// A date-scoped bundle of insights plus the score that gated them.
/// Unique per (learner, date); overwritten on regeneration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub learner_id: String,
    /// ISO date (`YYYY-MM-DD`) the digest covers.
    pub date: String,
    pub insights: Vec<Insight>,
    pub scores: QualityScore,
    /// Whether the quality gate passed. A digest that failed the gate is
    /// still delivered; callers surface a quality warning.
    pub passed_gate: bool,
    /// The retrieval query the digest was generated from.
    pub query: String,
    pub chunk_count: i64,
    pub source_count: i64,
    pub avg_similarity: f64,
    pub generated_at: i64,
    pub expires_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_kind_roundtrip() {
        for kind in [SourceKind::Feed, SourceKind::Handle, SourceKind::Custom] {
            assert_eq!(SourceKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SourceKind::parse("rss"), None);
    }

    #[test]
    fn test_quality_score_mean() {
        let score = QualityScore {
            faithfulness: 0.9,
            context_precision: 0.6,
            context_recall: 0.3,
        };
        assert!((score.mean() - 0.6).abs() < 1e-9);
        assert_eq!(QualityScore::zero().mean(), 0.0);
    }
}
