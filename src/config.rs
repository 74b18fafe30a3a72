use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::LearnerContext;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub learner: LearnerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    750
}
fn default_overlap() -> usize {
    100
}
fn default_min_chunk_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,
    /// Candidates fetched per result slot before re-ranking.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_floor: default_similarity_floor(),
            overfetch_factor: default_overfetch_factor(),
        }
    }
}

fn default_top_k() -> i64 {
    15
}
fn default_similarity_floor() -> f64 {
    0.70
}
fn default_overfetch_factor() -> i64 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// API base override, mainly for tests and proxies.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_base: None,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    /// `"anthropic"` or `"disabled"`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_synthesis_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub timeout_secs: u64,
    /// API base override, mainly for tests and proxies.
    #[serde(default)]
    pub api_base: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            max_tokens: default_synthesis_max_tokens(),
            timeout_secs: default_synthesis_timeout_secs(),
            api_base: None,
        }
    }
}

impl SynthesisConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_synthesis_max_tokens() -> u32 {
    8000
}
fn default_synthesis_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    /// Every metric must reach this for the gate to pass.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Strict re-synthesis attempts allowed on low faithfulness.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            retry_budget: default_retry_budget(),
        }
    }
}

fn default_min_score() -> f64 {
    0.70
}
fn default_retry_budget() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct DigestConfig {
    #[serde(default = "default_insight_count")]
    pub insight_count: usize,
    /// Hours a generated digest stays fresh.
    #[serde(default = "default_cache_hours")]
    pub cache_hours: i64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            insight_count: default_insight_count(),
            cache_hours: default_cache_hours(),
        }
    }
}

fn default_insight_count() -> usize {
    5
}
fn default_cache_hours() -> i64 {
    6
}

/// The learner's study context, supplied via config and read-only to the
/// pipeline.
#[derive(Debug, Deserialize, Clone)]
pub struct LearnerConfig {
    #[serde(default = "default_learner_id")]
    pub id: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default)]
    pub goal: String,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            id: default_learner_id(),
            topics: Vec::new(),
            difficulty: default_difficulty(),
            goal: String::new(),
        }
    }
}

fn default_learner_id() -> String {
    "default".to_string()
}
fn default_difficulty() -> String {
    "intermediate".to_string()
}

impl LearnerConfig {
    pub fn context(&self) -> LearnerContext {
        LearnerContext {
            topics: self.topics.clone(),
            difficulty: self.difficulty.clone(),
            goal: self.goal.clone(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.min_chunk_size > config.chunking.chunk_size {
        anyhow::bail!("chunking.min_chunk_size must not exceed chunking.chunk_size");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.overfetch_factor < 1 {
        anyhow::bail!("retrieval.overfetch_factor must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_floor) {
        anyhow::bail!("retrieval.similarity_floor must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.evaluation.min_score) {
        anyhow::bail!("evaluation.min_score must be in [0.0, 1.0]");
    }

    if config.digest.cache_hours < 0 {
        anyhow::bail!("digest.cache_hours must be >= 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.synthesis.is_enabled() && config.synthesis.model.is_none() {
        anyhow::bail!(
            "synthesis.model must be specified when provider is '{}'",
            config.synthesis.provider
        );
    }
    match config.synthesis.provider.as_str() {
        "disabled" | "anthropic" => {}
        other => anyhow::bail!(
            "Unknown synthesis provider: '{}'. Must be disabled or anthropic.",
            other
        ),
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let file = write_config("[db]\npath = \"/tmp/learnfeed.sqlite\"\n");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.chunking.chunk_size, 750);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 15);
        assert!((config.retrieval.similarity_floor - 0.70).abs() < 1e-9);
        assert!((config.evaluation.min_score - 0.70).abs() < 1e-9);
        assert_eq!(config.evaluation.retry_budget, 2);
        assert_eq!(config.digest.cache_hours, 6);
        assert!(!config.embedding.is_enabled());
        assert!(!config.synthesis.is_enabled());
    }

    #[test]
    fn test_enabled_embedding_requires_model_and_dims() {
        let file = write_config(
            "[db]\npath = \"/tmp/learnfeed.sqlite\"\n[embedding]\nprovider = \"openai\"\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_rejects_bad_similarity_floor() {
        let file = write_config(
            "[db]\npath = \"/tmp/learnfeed.sqlite\"\n[retrieval]\nsimilarity_floor = 1.5\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let file = write_config(
            "[db]\npath = \"/tmp/learnfeed.sqlite\"\n[synthesis]\nprovider = \"llama\"\nmodel = \"x\"\n",
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_learner_context() {
        let file = write_config(
            r#"
[db]
path = "/tmp/learnfeed.sqlite"

[learner]
id = "learner-1"
topics = ["transformers", "attention"]
difficulty = "advanced"
goal = "Build an inference engine"
"#,
        );
        let config = load_config(file.path()).unwrap();
        let ctx = config.learner.context();
        assert_eq!(config.learner.id, "learner-1");
        assert_eq!(ctx.topics.len(), 2);
        assert_eq!(ctx.difficulty, "advanced");
    }
}
