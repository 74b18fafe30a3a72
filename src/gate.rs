//! Quality gate and retry controller.
//!
//! A bounded state machine: `Evaluating → Passed | Retrying → Failed`.
//! Only low faithfulness triggers a retry — precision and recall are
//! properties of retrieval, and re-synthesizing cannot fix them. Each retry
//! re-invokes the synthesizer in strict mode and consumes one unit of the
//! retry budget; a synthesizer failure during a retry consumes a unit the
//! same way a low score does.
//!
//! The gate never discards work: when it fails, the best-scoring candidate
//! observed across attempts is still returned, tagged as failing, and the
//! caller surfaces a quality warning instead of losing the digest.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::evaluate::Evaluator;
use crate::models::{Insight, LearnerContext, QualityScore, RetrievalResult};
use crate::synthesis::Synthesizer;

/// Gate states. `Passed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Evaluating,
    Retrying,
    Passed,
    Failed,
}

/// Final result of one gate run.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub insights: Vec<Insight>,
    pub scores: QualityScore,
    /// False means the caller received a best-effort candidate that did
    /// not clear the gate.
    pub passed: bool,
    /// Strict re-synthesis attempts actually spent.
    pub attempts: u32,
}

pub struct QualityGate {
    evaluator: Arc<dyn Evaluator>,
    min_score: f64,
}

impl QualityGate {
    pub fn new(evaluator: Arc<dyn Evaluator>, min_score: f64) -> Self {
        Self {
            evaluator,
            min_score,
        }
    }

    /// All three metrics must reach the minimum.
    pub fn passes(&self, scores: &QualityScore) -> bool {
        scores.faithfulness >= self.min_score
            && scores.context_precision >= self.min_score
            && scores.context_recall >= self.min_score
    }

    /// Run the gate over an initial candidate, retrying synthesis in strict
    /// mode while faithfulness is below the minimum and budget remains.
    pub async fn apply(
        &self,
        synthesizer: &dyn Synthesizer,
        query: &str,
        chunks: &[RetrievalResult],
        ctx: &LearnerContext,
        initial: Vec<Insight>,
        retry_budget: u32,
        synth_timeout: Duration,
    ) -> GateOutcome {
        let mut state = GateState::Evaluating;
        let mut current = initial;
        let mut attempts = 0u32;
        let mut best: Option<(Vec<Insight>, QualityScore)> = None;

        loop {
            debug!(?state, attempts, "quality gate step");
            let scores = self.evaluator.evaluate(query, &current, chunks);

            let improved = best
                .as_ref()
                .map(|(_, prev)| scores.mean() > prev.mean())
                .unwrap_or(true);
            if improved {
                best = Some((current.clone(), scores));
            }

            if self.passes(&scores) {
                state = GateState::Passed;
                info!(?state, attempts, mean = scores.mean(), "quality gate passed");
                return GateOutcome {
                    insights: current,
                    scores,
                    passed: true,
                    attempts,
                };
            }

            if scores.faithfulness < self.min_score && attempts < retry_budget {
                state = GateState::Retrying;
                attempts += 1;
                info!(
                    ?state,
                    attempt = attempts,
                    budget = retry_budget,
                    faithfulness = scores.faithfulness,
                    "faithfulness below minimum, retrying with strict synthesis"
                );

                let retry = timeout(
                    synth_timeout,
                    synthesizer.synthesize(query, chunks, ctx, current.len().max(1), true),
                )
                .await;

                match retry {
                    Ok(Ok(next)) if !next.is_empty() => current = next,
                    Ok(Ok(_)) => {
                        warn!("strict retry produced no insights, attempt consumed");
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "strict retry failed, attempt consumed");
                    }
                    Err(_) => {
                        warn!("strict retry timed out, attempt consumed");
                    }
                }

                state = GateState::Evaluating;
                continue;
            }

            // Terminal: budget exhausted, or a non-faithfulness metric is
            // below minimum with no retry policy defined for it.
            state = GateState::Failed;
            let (insights, scores) = best.expect("at least one attempt evaluated");
            info!(?state, attempts, mean = scores.mean(), "quality gate failed");
            return GateOutcome {
                insights,
                scores,
                passed: false,
                attempts,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceAttribution;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn insight(title: &str) -> Insight {
        Insight {
            title: title.to_string(),
            relevance: String::new(),
            explanation: "explanation".to_string(),
            takeaway: "takeaway".to_string(),
            source: SourceAttribution {
                title: "src".to_string(),
                author: None,
                url: "https://example.com".to_string(),
            },
        }
    }

    fn score(faithfulness: f64, precision: f64, recall: f64) -> QualityScore {
        QualityScore {
            faithfulness,
            context_precision: precision,
            context_recall: recall,
        }
    }

    /// Returns scripted scores in order, repeating the last one.
    struct ScriptedEvaluator {
        scripted: Mutex<VecDeque<QualityScore>>,
        last: QualityScore,
    }

    impl ScriptedEvaluator {
        fn new(scores: Vec<QualityScore>) -> Self {
            let last = *scores.last().expect("at least one score");
            Self {
                scripted: Mutex::new(scores.into()),
                last,
            }
        }
    }

    impl Evaluator for ScriptedEvaluator {
        fn evaluate(
            &self,
            _query: &str,
            _insights: &[Insight],
            _chunks: &[RetrievalResult],
        ) -> QualityScore {
            self.scripted.lock().unwrap().pop_front().unwrap_or(self.last)
        }
    }

    /// Counts invocations; optionally fails every call.
    struct StubSynthesizer {
        calls: AtomicU32,
        fail: bool,
    }

    impl StubSynthesizer {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Synthesizer for StubSynthesizer {
        async fn synthesize(
            &self,
            _query: &str,
            _chunks: &[RetrievalResult],
            _ctx: &LearnerContext,
            _insight_count: usize,
            strict: bool,
        ) -> Result<Vec<Insight>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert!(strict, "gate retries must request strict synthesis");
            if self.fail {
                bail!("synthesis unavailable");
            }
            Ok(vec![insight(&format!("retry-{}", n))])
        }
    }

    fn gate(evaluator: ScriptedEvaluator) -> QualityGate {
        QualityGate::new(Arc::new(evaluator), 0.70)
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_passes_without_retry() {
        let gate = gate(ScriptedEvaluator::new(vec![score(0.9, 0.8, 0.8)]));
        let synth = StubSynthesizer::new(false);

        let outcome = gate
            .apply(
                &synth,
                "q",
                &[],
                &LearnerContext::default(),
                vec![insight("initial")],
                2,
                TIMEOUT,
            )
            .await;

        assert!(outcome.passed);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(synth.calls(), 0);
        assert_eq!(outcome.insights[0].title, "initial");
    }

    #[tokio::test]
    async fn test_persistent_low_faithfulness_exhausts_exact_budget() {
        let gate = gate(ScriptedEvaluator::new(vec![score(0.4, 0.9, 0.9)]));
        let synth = StubSynthesizer::new(false);

        let outcome = gate
            .apply(
                &synth,
                "q",
                &[],
                &LearnerContext::default(),
                vec![insight("initial")],
                2,
                TIMEOUT,
            )
            .await;

        assert!(!outcome.passed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(synth.calls(), 2, "exactly retry_budget retries, never more");
    }

    #[tokio::test]
    async fn test_recovers_after_one_retry() {
        let gate = gate(ScriptedEvaluator::new(vec![
            score(0.5, 0.9, 0.9),
            score(0.85, 0.9, 0.9),
        ]));
        let synth = StubSynthesizer::new(false);

        let outcome = gate
            .apply(
                &synth,
                "q",
                &[],
                &LearnerContext::default(),
                vec![insight("initial")],
                2,
                TIMEOUT,
            )
            .await;

        assert!(outcome.passed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(synth.calls(), 1);
        assert_eq!(outcome.insights[0].title, "retry-1");
    }

    #[tokio::test]
    async fn test_low_precision_never_retries() {
        // Faithfulness clears the bar; precision does not. Re-synthesis
        // cannot fix retrieval, so the gate fails immediately.
        let gate = gate(ScriptedEvaluator::new(vec![score(0.9, 0.4, 0.9)]));
        let synth = StubSynthesizer::new(false);

        let outcome = gate
            .apply(
                &synth,
                "q",
                &[],
                &LearnerContext::default(),
                vec![insight("initial")],
                2,
                TIMEOUT,
            )
            .await;

        assert!(!outcome.passed);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(synth.calls(), 0);
    }

    #[tokio::test]
    async fn test_synthesizer_failure_consumes_budget_and_keeps_best() {
        let gate = gate(ScriptedEvaluator::new(vec![score(0.4, 0.9, 0.9)]));
        let synth = StubSynthesizer::new(true);

        let outcome = gate
            .apply(
                &synth,
                "q",
                &[],
                &LearnerContext::default(),
                vec![insight("initial")],
                2,
                TIMEOUT,
            )
            .await;

        assert!(!outcome.passed);
        assert_eq!(synth.calls(), 2);
        // The failed retries never replaced the candidate.
        assert_eq!(outcome.insights[0].title, "initial");
    }

    #[tokio::test]
    async fn test_failed_gate_returns_best_scoring_attempt() {
        // Retries keep making things worse; the gate must hand back the
        // strongest candidate it saw, not the last one.
        let gate = gate(ScriptedEvaluator::new(vec![
            score(0.6, 0.9, 0.9),
            score(0.3, 0.9, 0.9),
            score(0.1, 0.9, 0.9),
        ]));
        let synth = StubSynthesizer::new(false);

        let outcome = gate
            .apply(
                &synth,
                "q",
                &[],
                &LearnerContext::default(),
                vec![insight("initial")],
                2,
                TIMEOUT,
            )
            .await;

        assert!(!outcome.passed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.insights[0].title, "initial");
        assert!((outcome.scores.faithfulness - 0.6).abs() < 1e-9);
    }
}
