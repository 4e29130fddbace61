//! Language-model completion clients.
//!
//! Two [`LanguageModel`] backends:
//! - **[`OpenAiChat`]**: any OpenAI-compatible `/chat/completions` endpoint
//!   (Groq by default). The bearer token is read from the environment
//!   variable named by `llm.api_key_env`.
//! - **[`OllamaChat`]**: a local Ollama instance's `/api/chat`.
//!
//! Each `complete` call is a single attempt. [`complete_with_retry`] wraps
//! a call in the configured backoff policy and turns exhaustion into
//! [`DigestError::LlmUnavailable`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::DigestError;
use crate::retry::{retry, CallError, RetryPolicy};
use crate::traits::LanguageModel;

/// Build the configured backend.
pub fn create_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

/// Stand-in used when the configured backend cannot be built (typically a
/// missing API key), so that operations not needing a model still work.
/// Every completion fails permanently with the original reason.
pub struct UnconfiguredModel {
    model: String,
    reason: String,
}

impl UnconfiguredModel {
    pub fn new(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl LanguageModel for UnconfiguredModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _prompt: &str) -> Result<String, CallError> {
        Err(CallError::permanent(anyhow!("{}", self.reason)))
    }
}

/// Run one prompt under `policy`.
pub async fn complete_with_retry(
    model: &dyn LanguageModel,
    policy: &RetryPolicy,
    what: &str,
    prompt: &str,
) -> Result<String, DigestError> {
    retry(policy, what, |_| model.complete(prompt))
        .await
        .map_err(|e| DigestError::LlmUnavailable {
            attempts: e.attempts,
            cause: e.cause(),
        })
}

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build LLM HTTP client")
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

impl Message {
    fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiChat {
    /// # Errors
    ///
    /// Fails when the API key variable is unset or empty.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        Ok(Self {
            client: http_client(config)?,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, CallError> {
        let req = OpenAiChatRequest {
            model: &self.model,
            messages: vec![Message::user(prompt)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::from_status("chat API", status, &body));
        }

        let body: OpenAiChatResponse = resp.json().await?;
        extract_content(body)
    }
}

fn extract_content(body: OpenAiChatResponse) -> Result<String, CallError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        // An empty completion is usually a provider hiccup.
        .ok_or_else(|| CallError::transient(anyhow!("chat API returned no content")))
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: Message,
}

pub struct OllamaChat {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, CallError> {
        let url = format!("{}/api/chat", self.base_url);
        let req = OllamaChatRequest {
            model: &self.model,
            messages: vec![Message::user(prompt)],
            stream: false,
            options: OllamaOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let resp = self.client.post(&url).json(&req).send().await.map_err(|e| {
            CallError::transient(anyhow!(
                "Ollama connection error (is Ollama running at {}?): {}",
                self.base_url,
                e
            ))
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::from_status("Ollama chat API", status, &body));
        }

        let body: OllamaChatResponse = resp.json().await?;
        Ok(body.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Down(AtomicU32);

    #[async_trait]
    impl LanguageModel for Down {
        fn model_name(&self) -> &str {
            "down"
        }
        async fn complete(&self, _prompt: &str) -> Result<String, CallError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(CallError::transient(anyhow!("HTTP 503")))
        }
    }

    #[tokio::test]
    async fn retry_exhaustion_is_llm_unavailable() {
        let model = Down(AtomicU32::new(0));
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let err = complete_with_retry(&model, &policy, "map", "prompt")
            .await
            .unwrap_err();
        match err {
            DigestError::LlmUnavailable { attempts, cause } => {
                assert_eq!(attempts, 2);
                assert!(cause.contains("503"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(model.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unconfigured_model_fails_fast() {
        let model = UnconfiguredModel::new("m", "GROQ_API_KEY environment variable not set");
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        match complete_with_retry(&model, &policy, "reduce", "prompt").await {
            Err(DigestError::LlmUnavailable { attempts, cause }) => {
                assert_eq!(attempts, 1);
                assert!(cause.contains("GROQ_API_KEY"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn openai_content_extraction() {
        let body: OpenAiChatResponse = serde_json::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":"Hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_content(body).unwrap(), "Hello");

        let empty: OpenAiChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(extract_content(empty).unwrap_err().is_transient());
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let config = LlmConfig {
            api_key_env: "PAPER_DIGEST_TEST_UNSET_KEY".into(),
            ..LlmConfig::default()
        };
        let err = OpenAiChat::new(&config).err().unwrap();
        assert!(err.to_string().contains("PAPER_DIGEST_TEST_UNSET_KEY"));
    }

    #[test]
    fn ollama_needs_no_key() {
        let config = LlmConfig {
            provider: "ollama".into(),
            base_url: "http://localhost:11434/".into(),
            ..LlmConfig::default()
        };
        let model = create_model(&config).unwrap();
        assert_eq!(model.model_name(), config.model);
    }
}
