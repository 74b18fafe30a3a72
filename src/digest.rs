//! Digest generation and caching.
//!
//! [`DigestGenerator`] wraps the whole retrieve → synthesize → evaluate →
//! gate sequence behind a time-boxed cache keyed by `(learner, date)`.
//! Generation is single-flight per key: concurrent requests collapse into
//! one pipeline run, with the second caller awaiting the first's cached
//! result. The digest write is a single atomic upsert, so readers never
//! observe a partially generated digest.

use anyhow::{anyhow, Result};
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::evaluate::Evaluator;
use crate::gate::QualityGate;
use crate::models::{Digest, Insight, LearnerContext, QualityScore, RetrievalResult};
use crate::query;
use crate::retrieve::HybridRetriever;
use crate::store::Store;
use crate::synthesis::Synthesizer;

/// Tunables for digest generation, extracted from [`Config`].
#[derive(Debug, Clone)]
pub struct DigestSettings {
    pub top_k: i64,
    pub similarity_floor: f64,
    pub overfetch_factor: i64,
    pub insight_count: usize,
    pub min_score: f64,
    pub retry_budget: u32,
    pub cache_hours: i64,
    pub synth_timeout: Duration,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            top_k: 15,
            similarity_floor: 0.70,
            overfetch_factor: 2,
            insight_count: 5,
            min_score: 0.70,
            retry_budget: 2,
            cache_hours: 6,
            synth_timeout: Duration::from_secs(120),
        }
    }
}

impl DigestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            similarity_floor: config.retrieval.similarity_floor,
            overfetch_factor: config.retrieval.overfetch_factor,
            insight_count: config.digest.insight_count,
            min_score: config.evaluation.min_score,
            retry_budget: config.evaluation.retry_budget,
            cache_hours: config.digest.cache_hours,
            synth_timeout: Duration::from_secs(config.synthesis.timeout_secs),
        }
    }
}

pub struct DigestGenerator {
    store: Arc<dyn Store>,
    retriever: HybridRetriever,
    synthesizer: Arc<dyn Synthesizer>,
    gate: QualityGate,
    settings: DigestSettings,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DigestGenerator {
    pub fn new(
        store: Arc<dyn Store>,
        embeddings: Arc<dyn EmbeddingClient>,
        synthesizer: Arc<dyn Synthesizer>,
        evaluator: Arc<dyn Evaluator>,
        settings: DigestSettings,
    ) -> Self {
        let retriever = HybridRetriever::new(
            Arc::clone(&store),
            embeddings,
            settings.overfetch_factor,
        );
        let gate = QualityGate::new(evaluator, settings.min_score);
        Self {
            store,
            retriever,
            synthesizer,
            gate,
            settings,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached digest for `(learner, date)` or generate a new
    /// one.
    ///
    /// `force_refresh` regenerates regardless of expiry and overwrites the
    /// cache entry even if the new quality score is lower. The caller
    /// always receives a digest (possibly gate-failing, tagged as such) or
    /// an explicit error — never a partial result.
    pub async fn get_or_generate(
        &self,
        learner_id: &str,
        ctx: &LearnerContext,
        date: NaiveDate,
        force_refresh: bool,
        explicit_query: Option<&str>,
    ) -> Result<Digest> {
        let date_str = date.format("%Y-%m-%d").to_string();

        if !force_refresh {
            if let Some(cached) = self
                .store
                .get_fresh_digest(learner_id, &date_str, Utc::now().timestamp())
                .await?
            {
                info!(learner = learner_id, date = %date_str, "digest cache hit");
                return Ok(cached);
            }
        }

        let lock = self.key_lock(learner_id, &date_str).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: a concurrent request may have finished
        // generating while this one waited.
        if !force_refresh {
            if let Some(cached) = self
                .store
                .get_fresh_digest(learner_id, &date_str, Utc::now().timestamp())
                .await?
            {
                info!(
                    learner = learner_id,
                    date = %date_str,
                    "digest generated by concurrent request"
                );
                return Ok(cached);
            }
        }

        self.generate(learner_id, ctx, &date_str, explicit_query).await
    }

    async fn generate(
        &self,
        learner_id: &str,
        ctx: &LearnerContext,
        date_str: &str,
        explicit_query: Option<&str>,
    ) -> Result<Digest> {
        let query = query::build_query(ctx, explicit_query);
        info!(learner = learner_id, date = %date_str, "generating digest");

        let chunks = self
            .retriever
            .retrieve(
                &query,
                self.settings.top_k,
                self.settings.similarity_floor,
                Some(learner_id),
            )
            .await?;

        if chunks.is_empty() {
            warn!(learner = learner_id, "empty retrieval, caching empty digest");
            let digest = self.build_digest(
                learner_id,
                date_str,
                &query,
                &chunks,
                Vec::new(),
                QualityScore::zero(),
                false,
            );
            self.store.upsert_digest(&digest).await?;
            return Ok(digest);
        }

        // First synthesis attempt; a failure here consumes retry-budget
        // units the same way a low faithfulness score would.
        let mut budget = self.settings.retry_budget;
        let mut initial: Option<Vec<Insight>> = None;
        let mut last_err = None;

        match self.synthesize_once(&query, &chunks, ctx, false).await {
            Ok(insights) => initial = Some(insights),
            Err(e) => last_err = Some(e),
        }
        while initial.is_none() && budget > 0 {
            budget -= 1;
            warn!(
                remaining_budget = budget,
                "initial synthesis failed, retrying strict"
            );
            match self.synthesize_once(&query, &chunks, ctx, true).await {
                Ok(insights) => initial = Some(insights),
                Err(e) => last_err = Some(e),
            }
        }

        let initial = match initial {
            Some(insights) => insights,
            None => {
                return Err(last_err
                    .unwrap_or_else(|| anyhow!("Synthesis produced no result"))
                    .context("Digest generation failed"));
            }
        };

        let outcome = self
            .gate
            .apply(
                self.synthesizer.as_ref(),
                &query,
                &chunks,
                ctx,
                initial,
                budget,
                self.settings.synth_timeout,
            )
            .await;

        let digest = self.build_digest(
            learner_id,
            date_str,
            &query,
            &chunks,
            outcome.insights,
            outcome.scores,
            outcome.passed,
        );
        self.store.upsert_digest(&digest).await?;

        info!(
            learner = learner_id,
            date = %date_str,
            insights = digest.insights.len(),
            passed = digest.passed_gate,
            mean = digest.scores.mean(),
            "digest stored"
        );
        Ok(digest)
    }

    async fn synthesize_once(
        &self,
        query: &str,
        chunks: &[RetrievalResult],
        ctx: &LearnerContext,
        strict: bool,
    ) -> Result<Vec<Insight>> {
        match timeout(
            self.settings.synth_timeout,
            self.synthesizer
                .synthesize(query, chunks, ctx, self.settings.insight_count, strict),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow!(
                "Synthesis timed out after {:?}",
                self.settings.synth_timeout
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_digest(
        &self,
        learner_id: &str,
        date_str: &str,
        query: &str,
        chunks: &[RetrievalResult],
        insights: Vec<Insight>,
        scores: QualityScore,
        passed_gate: bool,
    ) -> Digest {
        let source_count = chunks
            .iter()
            .map(|c| c.source_id.as_str())
            .collect::<HashSet<_>>()
            .len() as i64;
        let avg_similarity = if chunks.is_empty() {
            0.0
        } else {
            chunks.iter().map(|c| c.similarity).sum::<f64>() / chunks.len() as f64
        };
        let now = Utc::now().timestamp();

        Digest {
            learner_id: learner_id.to_string(),
            date: date_str.to_string(),
            insights,
            scores,
            passed_gate,
            query: query.to_string(),
            chunk_count: chunks.len() as i64,
            source_count,
            avg_similarity,
            generated_at: now,
            expires_at: now + self.settings.cache_hours * 3_600,
        }
    }

    async fn key_lock(&self, learner_id: &str, date_str: &str) -> Arc<Mutex<()>> {
        let key = format!("{}|{}", learner_id, date_str);
        let mut inflight = self.inflight.lock().await;
        Arc::clone(inflight.entry(key).or_default())
    }
}
