//! Insight synthesis collaborator.
//!
//! The digest pipeline talks to the generative model through the
//! [`Synthesizer`] trait, so tests can substitute deterministic stand-ins.
//! [`ClaudeSynthesizer`] is the production implementation over the
//! Anthropic messages API.
//!
//! The `strict` flag is the quality gate's lever: a strict retry biases the
//! model toward close paraphrase of the supplied chunks and explicit
//! rejection of claims not traceable to them.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::SynthesisConfig;
use crate::models::{Insight, LearnerContext, RetrievalResult, SourceAttribution};

/// Turns ranked chunks plus learner context into structured insights.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize up to `insight_count` insights grounded in `chunks`.
    ///
    /// Malformed or unparseable model output is a hard failure, not a
    /// partial success.
    async fn synthesize(
        &self,
        query: &str,
        chunks: &[RetrievalResult],
        ctx: &LearnerContext,
        insight_count: usize,
        strict: bool,
    ) -> Result<Vec<Insight>>;
}

/// Transient-failure retries for the synthesis HTTP call.
const MAX_ATTEMPTS: u32 = 3;

/// Synthesizer backed by the Anthropic messages API.
///
/// Requires the `ANTHROPIC_API_KEY` environment variable.
pub struct ClaudeSynthesizer {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("synthesis.model required for Anthropic provider"))?;
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            api_key,
            model,
            max_tokens: config.max_tokens,
        })
    }

    async fn call_model(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.api_base);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0.3,
            "system": system,
            "messages": [{ "role": "user", "content": user }],
        });

        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let text = json
                            .get("content")
                            .and_then(|c| c.as_array())
                            .and_then(|blocks| blocks.first())
                            .and_then(|block| block.get("text"))
                            .and_then(|t| t.as_str())
                            .ok_or_else(|| {
                                anyhow::anyhow!("Synthesis response has no text content")
                            })?;
                        return Ok(text.to_string());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!(
                            "Synthesis API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("Synthesis API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Synthesis failed after retries")))
    }
}

#[async_trait]
impl Synthesizer for ClaudeSynthesizer {
    async fn synthesize(
        &self,
        query: &str,
        chunks: &[RetrievalResult],
        ctx: &LearnerContext,
        insight_count: usize,
        strict: bool,
    ) -> Result<Vec<Insight>> {
        if chunks.is_empty() {
            bail!("No chunks provided for synthesis");
        }

        let system = build_system_prompt(strict);
        let user = build_user_prompt(query, chunks, ctx, insight_count);

        let response = self.call_model(&system, &user).await?;
        parse_insights(&response)
    }
}

/// Build the synthesis system prompt; `strict` appends the close-paraphrase
/// constraints used on gate retries.
pub fn build_system_prompt(strict: bool) -> String {
    let mut prompt = String::from(
        "You are a learning coach who turns source excerpts into personalized \
         study insights. Explain from first principles, connect theory to \
         practice, and ground every claim in the provided sources. Each insight \
         must be self-contained and end with one immediately actionable step.",
    );

    if strict {
        prompt.push_str(
            "\n\nSTRICT MODE: stay as close to the source wording as accuracy \
             allows. Do not speculate beyond the source material. If a detail \
             is not stated in a source, omit it rather than infer it. Reject \
             any claim you cannot trace to a specific excerpt.",
        );
    }

    prompt
}

/// Assemble the user prompt: learner context, query, numbered source
/// excerpts, and the required JSON output shape.
pub fn build_user_prompt(
    query: &str,
    chunks: &[RetrievalResult],
    ctx: &LearnerContext,
    insight_count: usize,
) -> String {
    let topics = if ctx.topics.is_empty() {
        "general study".to_string()
    } else {
        ctx.topics.join(", ")
    };

    format!(
        "# Learner\n\
         Topics: {topics}\n\
         Level: {level}\n\
         Goal: {goal}\n\n\
         # Query\n{query}\n\n\
         # Sources\n{context}\n\
         # Task\n\
         Generate {count} insights from the sources above, tailored to the \
         learner. Return ONLY a JSON object of the form:\n\
         {{\"insights\": [{{\"title\": \"...\", \"relevance\": \"why this \
         matters now\", \"explanation\": \"...\", \"takeaway\": \"one \
         actionable step\", \"source\": {{\"title\": \"...\", \"author\": \
         \"...\", \"url\": \"...\"}}}}]}}\n\
         Base every insight strictly on the sources; attribute each to the \
         source it was drawn from.",
        topics = topics,
        level = ctx.difficulty,
        goal = if ctx.goal.is_empty() {
            "not stated"
        } else {
            ctx.goal.as_str()
        },
        query = query,
        context = build_context_text(chunks),
        count = insight_count,
    )
}

/// Format ranked chunks as numbered source blocks.
pub fn build_context_text(chunks: &[RetrievalResult]) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "## Source {n}: {title}\nAuthor: {author}\nURL: {url}\nRelevance: {sim:.3}\n\n{text}\n\n---\n",
            n = i + 1,
            title = chunk.title,
            author = chunk.author.as_deref().unwrap_or("Unknown"),
            url = chunk.url,
            sim = chunk.similarity,
            text = chunk.text,
        ));
    }
    out
}

// ============ Response parsing ============

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex"));

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("static regex"));

#[derive(Debug, Deserialize)]
struct InsightsPayload {
    #[serde(default)]
    insights: Vec<InsightPayload>,
}

#[derive(Debug, Deserialize)]
struct InsightPayload {
    title: Option<String>,
    #[serde(default)]
    relevance: Option<String>,
    explanation: Option<String>,
    takeaway: Option<String>,
    source: Option<AttributionPayload>,
}

#[derive(Debug, Deserialize)]
struct AttributionPayload {
    title: Option<String>,
    #[serde(default)]
    author: Option<String>,
    url: Option<String>,
}

/// Parse a synthesis response into insights.
///
/// Accepts bare JSON, a fenced ```json block, or JSON embedded in
/// surrounding prose. Insights missing required fields are dropped with a
/// warning; a response yielding no usable insight at all is an error.
pub fn parse_insights(response: &str) -> Result<Vec<Insight>> {
    let payload = extract_json(response).context("Synthesis response is not valid JSON")?;
    let parsed: InsightsPayload =
        serde_json::from_value(payload).context("Synthesis response shape mismatch")?;

    let mut insights = Vec::new();
    for (i, raw) in parsed.insights.into_iter().enumerate() {
        let (title, explanation, takeaway, source) =
            match (raw.title, raw.explanation, raw.takeaway, raw.source) {
                (Some(t), Some(e), Some(k), Some(s)) => (t, e, k, s),
                _ => {
                    warn!(index = i, "insight missing required fields, dropped");
                    continue;
                }
            };
        let (source_title, source_url) = match (source.title, source.url) {
            (Some(t), Some(u)) => (t, u),
            _ => {
                warn!(index = i, "insight missing source attribution, dropped");
                continue;
            }
        };

        insights.push(Insight {
            title,
            relevance: raw.relevance.unwrap_or_default(),
            explanation,
            takeaway,
            source: SourceAttribution {
                title: source_title,
                author: source.author,
                url: source_url,
            },
        });
    }

    if insights.is_empty() {
        bail!("Synthesis response contained no usable insights");
    }
    Ok(insights)
}

fn extract_json(response: &str) -> Result<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(response.trim()) {
        return Ok(value);
    }

    if let Some(caps) = JSON_FENCE.captures(response) {
        if let Ok(value) = serde_json::from_str(&caps[1]) {
            return Ok(value);
        }
    }

    if let Some(m) = JSON_OBJECT.find(response) {
        if let Ok(value) = serde_json::from_str(m.as_str()) {
            return Ok(value);
        }
    }

    bail!("No JSON object found in response");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(title: &str, text: &str) -> RetrievalResult {
        RetrievalResult {
            chunk_id: "ch".to_string(),
            content_id: "c".to_string(),
            source_id: "s".to_string(),
            text: text.to_string(),
            title: title.to_string(),
            author: Some("Doe".to_string()),
            url: "https://example.com/a".to_string(),
            published_at: 0,
            source_priority: 3,
            similarity: 0.8,
            combined_score: 0.0,
        }
    }

    const VALID: &str = r#"{"insights": [{
        "title": "Attention weighs inputs",
        "relevance": "You are studying transformers",
        "explanation": "Attention computes a weighted sum over input positions.",
        "takeaway": "Implement scaled dot-product attention by hand.",
        "source": {"title": "Attention Is All You Need", "author": "Vaswani et al.", "url": "https://arxiv.org/abs/1706.03762"}
    }]}"#;

    #[test]
    fn test_parse_bare_json() {
        let insights = parse_insights(VALID).unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].title, "Attention weighs inputs");
        assert_eq!(insights[0].source.url, "https://arxiv.org/abs/1706.03762");
    }

    #[test]
    fn test_parse_fenced_json() {
        let wrapped = format!("Here you go:\n```json\n{}\n```\nDone.", VALID);
        let insights = parse_insights(&wrapped).unwrap();
        assert_eq!(insights.len(), 1);
    }

    #[test]
    fn test_parse_embedded_json() {
        let wrapped = format!("Sure! {} Hope that helps.", VALID);
        let insights = parse_insights(&wrapped).unwrap();
        assert_eq!(insights.len(), 1);
    }

    #[test]
    fn test_unparseable_is_hard_failure() {
        assert!(parse_insights("I could not produce insights today.").is_err());
        assert!(parse_insights("{\"insights\": \"oops\"}").is_err());
    }

    #[test]
    fn test_incomplete_insights_dropped() {
        let mixed = r#"{"insights": [
            {"title": "Only a title"},
            {"title": "Complete", "explanation": "E", "takeaway": "T",
             "source": {"title": "S", "url": "https://example.com"}}
        ]}"#;
        let insights = parse_insights(mixed).unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].title, "Complete");
    }

    #[test]
    fn test_all_incomplete_is_failure() {
        let bad = r#"{"insights": [{"title": "Only a title"}]}"#;
        assert!(parse_insights(bad).is_err());
    }

    #[test]
    fn test_strict_prompt_adds_constraints() {
        let relaxed = build_system_prompt(false);
        let strict = build_system_prompt(true);
        assert!(!relaxed.contains("STRICT MODE"));
        assert!(strict.contains("STRICT MODE"));
        assert!(strict.starts_with(&relaxed));
    }

    #[test]
    fn test_user_prompt_numbers_sources() {
        let chunks = vec![
            chunk("First Article", "Alpha text."),
            chunk("Second Article", "Beta text."),
        ];
        let ctx = LearnerContext {
            topics: vec!["transformers".to_string()],
            difficulty: "advanced".to_string(),
            goal: "Ship a model".to_string(),
        };
        let prompt = build_user_prompt("how does attention work", &chunks, &ctx, 3);
        assert!(prompt.contains("## Source 1: First Article"));
        assert!(prompt.contains("## Source 2: Second Article"));
        assert!(prompt.contains("Generate 3 insights"));
        assert!(prompt.contains("transformers"));
    }
}
