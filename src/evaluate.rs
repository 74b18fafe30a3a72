//! Quality evaluation for synthesized insights.
//!
//! Three metrics, each computed independently, each normalized to [0, 1]:
//!
//! - **faithfulness** — are the insight's claims supported by the
//!   retrieved chunks;
//! - **context precision** — what fraction of the retrieved chunks is
//!   relevant to the query and the insights actually produced;
//! - **context recall** — does the retrieved set cover the query's
//!   information need.
//!
//! A metric that cannot be computed (zero chunks, empty query) is defined
//! as 0, not an error. The [`LexicalEvaluator`] scores by content-word
//! overlap; it is deterministic, which keeps the quality gate testable.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::models::{Insight, QualityScore, RetrievalResult};

/// Scores one synthesis attempt against its query and retrieved chunks.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        query: &str,
        insights: &[Insight],
        chunks: &[RetrievalResult],
    ) -> QualityScore;
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9]+").expect("static regex"));

static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]+").expect("static regex"));

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "for", "from", "has",
    "have", "how", "if", "in", "into", "is", "it", "its", "not", "of", "on", "or", "so", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "to", "was", "we", "were",
    "what", "when", "which", "will", "with", "you", "your",
];

/// A chunk counts as relevant when it shares at least this many content
/// words with the query-plus-insights vocabulary.
const PRECISION_MIN_OVERLAP: usize = 2;

/// An insight sentence counts as supported when some single chunk covers
/// at least this fraction of its content words.
const SUPPORT_THRESHOLD: f64 = 0.6;

fn content_words(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    WORD.find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_END
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Content-word-overlap evaluator.
pub struct LexicalEvaluator;

impl Evaluator for LexicalEvaluator {
    fn evaluate(
        &self,
        query: &str,
        insights: &[Insight],
        chunks: &[RetrievalResult],
    ) -> QualityScore {
        let chunk_vocabs: Vec<HashSet<String>> =
            chunks.iter().map(|c| content_words(&c.text)).collect();

        QualityScore {
            faithfulness: faithfulness(insights, &chunk_vocabs).clamp(0.0, 1.0),
            context_precision: context_precision(query, insights, &chunk_vocabs).clamp(0.0, 1.0),
            context_recall: context_recall(query, &chunk_vocabs).clamp(0.0, 1.0),
        }
    }
}

/// Fraction of insight sentences whose content words are covered by some
/// single retrieved chunk.
fn faithfulness(insights: &[Insight], chunk_vocabs: &[HashSet<String>]) -> f64 {
    if insights.is_empty() || chunk_vocabs.is_empty() {
        return 0.0;
    }

    let mut total = 0usize;
    let mut supported = 0usize;

    for insight in insights {
        // Titles are labels, not claims; only the explanation and takeaway
        // must be entailed by the sources.
        let text = format!("{}. {}", insight.explanation, insight.takeaway);
        for sentence in sentences(&text) {
            let words = content_words(sentence);
            if words.is_empty() {
                continue;
            }
            total += 1;

            let best = chunk_vocabs
                .iter()
                .map(|vocab| words.intersection(vocab).count())
                .max()
                .unwrap_or(0);
            if best as f64 / words.len() as f64 >= SUPPORT_THRESHOLD {
                supported += 1;
            }
        }
    }

    if total == 0 {
        return 0.0;
    }
    supported as f64 / total as f64
}

/// Fraction of retrieved chunks that share vocabulary with the query or
/// the produced insights.
fn context_precision(
    query: &str,
    insights: &[Insight],
    chunk_vocabs: &[HashSet<String>],
) -> f64 {
    if chunk_vocabs.is_empty() {
        return 0.0;
    }

    let mut relevant_vocab = content_words(query);
    for insight in insights {
        relevant_vocab.extend(content_words(&insight.explanation));
        relevant_vocab.extend(content_words(&insight.title));
    }
    if relevant_vocab.is_empty() {
        return 0.0;
    }

    let needed = PRECISION_MIN_OVERLAP.min(relevant_vocab.len());
    let relevant = chunk_vocabs
        .iter()
        .filter(|vocab| vocab.intersection(&relevant_vocab).count() >= needed)
        .count();

    relevant as f64 / chunk_vocabs.len() as f64
}

/// Fraction of the query's content words that appear somewhere in the
/// retrieved set.
fn context_recall(query: &str, chunk_vocabs: &[HashSet<String>]) -> f64 {
    if chunk_vocabs.is_empty() {
        return 0.0;
    }

    let query_words = content_words(query);
    if query_words.is_empty() {
        return 0.0;
    }

    let covered = query_words
        .iter()
        .filter(|word| chunk_vocabs.iter().any(|vocab| vocab.contains(*word)))
        .count();

    covered as f64 / query_words.len() as f64
}
