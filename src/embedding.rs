//! Summary embeddings for the similarity lookup.
//!
//! Embeddings are optional. When `[embedding] provider` is set, every
//! stored summary gets a vector, and
//! [`FingerprintCache::nearest`](crate::cache::FingerprintCache::nearest)
//! can rank cached articles by how close their summaries are.
//!
//! Providers:
//! - **[`DisabledProvider`]**: the default; refuses every call.
//! - **[`OpenAiEmbedder`]**: an OpenAI-compatible `/embeddings` endpoint,
//!   key from `OPENAI_API_KEY`.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed`.
//!
//! ```rust
//! # use paper_digest::config::EmbeddingConfig;
//! # use paper_digest::embedding::create_provider;
//! let provider = create_provider(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(provider.model_name(), "disabled");
//! ```
//!
//! Remote calls go through [`crate::retry`]: 429, 5xx and network errors
//! are retried `max_retries` times with exponential backoff from one second.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::retry::{retry, CallError, RetryPolicy};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    provider
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("embedding response was empty"))
}

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embeddings are disabled; set [embedding] provider in config")
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    policy: RetryPolicy,
}

impl OpenAiEmbedder {
    /// # Errors
    ///
    /// Fails when `model` or `dims` is missing or `OPENAI_API_KEY` is unset.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.url.as_deref().unwrap_or(OPENAI_DEFAULT_URL);
        Ok(Self {
            client: http_client(config)?,
            url: format!("{}/embeddings", base.trim_end_matches('/')),
            api_key,
            model,
            dims,
            policy: retry_policy(config),
        })
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CallError> {
        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::from_status("embeddings API", status, &body));
        }
        let body: OpenAiEmbedResponse = resp.json().await?;
        Ok(order_by_index(body))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = retry(&self.policy, "embed summary", |_| self.call(texts)).await?;
        check_shape(vectors, texts.len(), self.dims)
    }
}

fn order_by_index(body: OpenAiEmbedResponse) -> Vec<Vec<f32>> {
    let mut indexed: Vec<(usize, Vec<f32>)> = body
        .data
        .into_iter()
        .enumerate()
        .map(|(position, item)| (item.index.unwrap_or(position), item.embedding))
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, v)| v).collect()
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: usize,
    policy: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let base = config.url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
        Ok(Self {
            client: http_client(config)?,
            base_url: base.trim_end_matches('/').to_string(),
            model,
            dims,
            policy: retry_policy(config),
        })
    }

    async fn call(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CallError> {
        let resp = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| {
                CallError::transient(anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.base_url,
                    e
                ))
            })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::from_status("Ollama embed API", status, &body));
        }
        let body: OllamaEmbedResponse = resp.json().await?;
        Ok(body.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = retry(&self.policy, "embed summary", |_| self.call(texts)).await?;
        check_shape(vectors, texts.len(), self.dims)
    }
}

// ─── Helpers ─────────────────────────────────────────────

fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for provider '{}'", config.provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for provider '{}'", config.provider))?;
    Ok((model, dims))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build embedding HTTP client")
}

/// `max_retries` counts retries, so attempts are one more.
fn retry_policy(config: &EmbeddingConfig) -> RetryPolicy {
    RetryPolicy::new(config.max_retries + 1, Duration::from_secs(1))
}

fn check_shape(vectors: Vec<Vec<f32>>, expected_len: usize, dims: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected_len {
        bail!(
            "embedding count mismatch: sent {}, received {}",
            expected_len,
            vectors.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        bail!("embedding dims mismatch: expected {}, got {}", dims, bad.len());
    }
    Ok(vectors)
}

/// Build the configured provider.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Cosine of the angle between `a` and `b`, in `[-1.0, 1.0]`.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
///
/// Empty, mismatched or zero-length vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(d, na, nb), (x, y)| {
            (d + x * y, na + x * x, nb + y * y)
        });
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        let v = [1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn openai_vectors_follow_index() {
        let body: OpenAiEmbedResponse = serde_json::from_str(
            r#"{"data":[{"index":1,"embedding":[0.0,1.0]},{"index":0,"embedding":[1.0,0.0]}]}"#,
        )
        .unwrap();
        assert_eq!(order_by_index(body), vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn ollama_body_shape() {
        let body: OllamaEmbedResponse =
            serde_json::from_str(r#"{"model":"nomic-embed-text","embeddings":[[0.5,0.5]]}"#)
                .unwrap();
        assert_eq!(body.embeddings, vec![vec![0.5, 0.5]]);
        assert!(serde_json::from_str::<OllamaEmbedResponse>("{}").is_err());
    }

    #[test]
    fn shape_is_checked() {
        assert!(check_shape(vec![vec![1.0, 2.0]], 1, 2).is_ok());
        assert!(check_shape(vec![vec![1.0]], 1, 2).is_err());
        assert!(check_shape(vec![], 1, 2).is_err());
    }

    #[test]
    fn ollama_requires_model_and_dims() {
        let config = EmbeddingConfig {
            provider: "ollama".into(),
            ..EmbeddingConfig::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("embedding.model"));

        let config = EmbeddingConfig {
            provider: "ollama".into(),
            model: Some("nomic-embed-text".into()),
            dims: Some(768),
            ..EmbeddingConfig::default()
        };
        assert_eq!(create_provider(&config).unwrap().dims(), 768);
    }

    #[tokio::test]
    async fn disabled_provider_refuses() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.dims(), 0);
        assert!(embed_one(provider.as_ref(), "text").await.is_err());
    }
}
