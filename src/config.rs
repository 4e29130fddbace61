use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::EvictionPolicy;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    1000
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_fetch_backoff_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_arxiv_api_url")]
    pub arxiv_api_url: String,
    #[serde(default = "default_arxiv_pdf_url")]
    pub arxiv_pdf_url: String,
    #[serde(default = "default_hal_api_url")]
    pub hal_api_url: String,
    #[serde(default = "default_true")]
    pub full_text: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_attempts: default_fetch_attempts(),
            backoff_base_ms: default_fetch_backoff_ms(),
            arxiv_api_url: default_arxiv_api_url(),
            arxiv_pdf_url: default_arxiv_pdf_url(),
            hal_api_url: default_hal_api_url(),
            full_text: true,
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }
}

fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_fetch_attempts() -> u32 {
    3
}
fn default_fetch_backoff_ms() -> u64 {
    500
}
fn default_arxiv_api_url() -> String {
    "https://export.arxiv.org/api/query".to_string()
}
fn default_arxiv_pdf_url() -> String {
    "https://arxiv.org/pdf".to_string()
}
fn default_hal_api_url() -> String {
    "https://api.archives-ouvertes.fr/search/".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_llm_backoff_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_map_concurrency")]
    pub map_concurrency: usize,
    #[serde(default = "default_max_key_concepts")]
    pub max_key_concepts: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            max_attempts: default_llm_attempts(),
            backoff_base_ms: default_llm_backoff_ms(),
            map_concurrency: default_map_concurrency(),
            max_key_concepts: default_max_key_concepts(),
        }
    }
}

impl LlmConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_llm_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}
fn default_llm_model() -> String {
    "meta-llama/llama-4-scout-17b-16e-instruct".to_string()
}
fn default_llm_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_attempts() -> u32 {
    3
}
fn default_llm_backoff_ms() -> u64 {
    1000
}
fn default_map_concurrency() -> usize {
    4
}
fn default_max_key_concepts() -> usize {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_policy")]
    pub policy: String,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            policy: default_cache_policy(),
            max_entries: default_max_entries(),
            max_bytes: default_max_bytes(),
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    pub fn eviction_policy(&self) -> Result<EvictionPolicy> {
        match self.policy.as_str() {
            "count" => Ok(EvictionPolicy::Count {
                max_entries: self.max_entries,
            }),
            "size" => Ok(EvictionPolicy::Size {
                max_bytes: self.max_bytes,
            }),
            other => anyhow::bail!(
                "Unknown cache policy: '{}'. Must be count or size.",
                other
            ),
        }
    }
}

fn default_cache_policy() -> String {
    "count".to_string()
}
fn default_max_entries() -> usize {
    256
}
fn default_max_bytes() -> usize {
    64 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// API root: the Ollama host (default `http://localhost:11434`) or an
    /// OpenAI-compatible base (default `https://api.openai.com/v1`).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            max_retries: 3,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_embed_retries() -> u32 {
    3
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_results_cap")]
    pub max_results_cap: usize,
    /// Attempts per repository; a timed-out attempt counts as transient.
    #[serde(default = "default_search_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_search_backoff_ms")]
    pub backoff_base_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_search_timeout_secs(),
            max_results_cap: default_max_results_cap(),
            max_attempts: default_search_attempts(),
            backoff_base_ms: default_search_backoff_ms(),
        }
    }
}

impl SearchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_base_ms))
    }
}

fn default_search_timeout_secs() -> u64 {
    15
}
fn default_max_results_cap() -> usize {
    100
}
fn default_search_attempts() -> u32 {
    2
}
fn default_search_backoff_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints that serde defaults cannot express.
pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    // Validate fetch
    if !(1..=3).contains(&config.fetch.max_attempts) {
        anyhow::bail!("fetch.max_attempts must be in [1, 3]");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    if config.llm.max_attempts == 0 {
        anyhow::bail!("llm.max_attempts must be >= 1");
    }
    if config.llm.map_concurrency == 0 {
        anyhow::bail!("llm.map_concurrency must be >= 1");
    }
    if !(1..=20).contains(&config.llm.max_key_concepts) {
        anyhow::bail!("llm.max_key_concepts must be in [1, 20]");
    }

    // Validate cache
    let policy = config.cache.eviction_policy()?;
    match policy {
        EvictionPolicy::Count { max_entries } if max_entries == 0 => {
            anyhow::bail!("cache.max_entries must be > 0")
        }
        EvictionPolicy::Size { max_bytes } if max_bytes == 0 => {
            anyhow::bail!("cache.max_bytes must be > 0")
        }
        _ => {}
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    if config.search.max_results_cap == 0 {
        anyhow::bail!("search.max_results_cap must be >= 1");
    }
    if !(1..=3).contains(&config.search.max_attempts) {
        anyhow::bail!("search.max_attempts must be in [1, 3]");
    }

    Ok(())
}
