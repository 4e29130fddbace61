//! In-process repositories and models shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use paper_digest::cache::{EvictionPolicy, FingerprintCache};
use paper_digest::config::Config;
use paper_digest::models::{Article, ArticleKey, SearchResult, Source};
use paper_digest::retry::CallError;
use paper_digest::service::Digest;
use paper_digest::traits::{Connector, ConnectorRegistry, LanguageModel};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const GOOD_OUTPUT: &str = "FINAL SUMMARY:\n\
The authors ask whether attention alone suffices for sequence transduction.\n\n\
They propose the Transformer and report state-of-the-art translation quality.\n\n\
KEY CONCEPTS:\n\
- Transformer\n\
- Self-attention\n\
- self-attention\n\
- Multi-head attention\n\
- Positional encoding\n\
- BLEU\n\
- Encoder-decoder\n\
- Layer normalization\n\
- Residual connections\n";

// ─── Repository ─────────────────────────────────────────────────────

pub enum SearchBehavior {
    Hits(usize),
    Fail,
    Hang,
}

/// A repository serving a fixed set of articles.
pub struct InMemoryRepository {
    source: Source,
    articles: HashMap<String, Article>,
    full_texts: HashMap<String, String>,
    search: SearchBehavior,
    pub metadata_calls: AtomicUsize,
    pub full_text_calls: AtomicUsize,
    /// Metadata calls that fail transiently before the first success.
    pub metadata_failures: AtomicU32,
}

impl InMemoryRepository {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            articles: HashMap::new(),
            full_texts: HashMap::new(),
            search: SearchBehavior::Hits(25),
            metadata_calls: AtomicUsize::new(0),
            full_text_calls: AtomicUsize::new(0),
            metadata_failures: AtomicU32::new(0),
        }
    }

    pub fn with_article(mut self, id: &str, title: &str, full_text: Option<&str>) -> Self {
        let key = ArticleKey::new(self.source, id);
        self.articles.insert(
            id.to_string(),
            Article {
                id: id.to_string(),
                source: self.source,
                title: title.to_string(),
                authors: vec!["Ada Lovelace".into(), "Alan Turing".into()],
                url: key.canonical_url(),
                full_text: None,
                abstract_text: Some(format!("Abstract of {}.", title)),
                published: Some("2017-06-12".into()),
                updated: None,
                pdf_url: None,
            },
        );
        if let Some(text) = full_text {
            self.full_texts.insert(id.to_string(), text.to_string());
        }
        self
    }

    pub fn with_search(mut self, behavior: SearchBehavior) -> Self {
        self.search = behavior;
        self
    }
}

#[async_trait]
impl Connector for InMemoryRepository {
    fn source(&self) -> Source {
        self.source
    }

    fn description(&self) -> &str {
        "in-memory test repository"
    }

    async fn fetch_metadata(&self, id: &str) -> Result<Article, CallError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.metadata_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.metadata_failures.store(pending - 1, Ordering::SeqCst);
            return Err(CallError::transient(anyhow::anyhow!("HTTP 503")));
        }
        self.articles.get(id).cloned().ok_or_else(|| {
            CallError::permanent(anyhow::anyhow!("{}:{} not found", self.source, id))
        })
    }

    async fn fetch_full_text(&self, article: &Article) -> Result<Option<String>, CallError> {
        self.full_text_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.full_texts.get(&article.id).cloned())
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, CallError> {
        match self.search {
            SearchBehavior::Hits(n) => Ok((0..n.min(max_results))
                .map(|i| {
                    let id = match self.source {
                        Source::Arxiv => format!("2401.{:05}", i),
                        Source::Hal => format!("hal-{:08}", i),
                    };
                    let key = ArticleKey::new(self.source, id.clone());
                    SearchResult {
                        url: key.canonical_url(),
                        id,
                        source: self.source,
                        title: format!("{} result {} for {}", self.source, i, query),
                        authors: vec!["Grace Hopper".into()],
                        abstract_text: None,
                        published: None,
                    }
                })
                .collect()),
            SearchBehavior::Fail => Err(CallError::transient(anyhow::anyhow!("HTTP 502"))),
            SearchBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }
}

// ─── Language model ─────────────────────────────────────────────────

/// Summarizes every excerpt with a fixed sentence and answers reduce
/// prompts with [`GOOD_OUTPUT`] unless told to fail.
#[derive(Default)]
pub struct ScriptedModel {
    pub map_calls: AtomicUsize,
    pub reduce_calls: AtomicUsize,
    pub fail_reduce: AtomicBool,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, CallError> {
        if prompt.contains("CONCISE SUMMARY:") {
            self.map_calls.fetch_add(1, Ordering::SeqCst);
            return Ok("This section describes part of the method.".to_string());
        }
        self.reduce_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reduce.load(Ordering::SeqCst) {
            return Err(CallError::transient(anyhow::anyhow!("HTTP 503")));
        }
        Ok(GOOD_OUTPUT.to_string())
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

/// Defaults with millisecond backoff, small chunks and short timeouts.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.fetch.backoff_base_ms = 1;
    config.llm.backoff_base_ms = 1;
    config.llm.max_attempts = 2;
    config.llm.max_key_concepts = 5;
    config.chunking.max_tokens = 40;
    config.chunking.overlap_tokens = 4;
    config.search.timeout_secs = 1;
    config.search.backoff_base_ms = 1;
    config
}

pub struct Harness {
    pub digest: Digest,
    pub arxiv: Arc<InMemoryRepository>,
    pub hal: Arc<InMemoryRepository>,
    pub model: Arc<ScriptedModel>,
}

pub fn harness(arxiv: InMemoryRepository, hal: InMemoryRepository) -> Harness {
    harness_with(test_config(), arxiv, hal)
}

pub fn harness_with(config: Config, arxiv: InMemoryRepository, hal: InMemoryRepository) -> Harness {
    let arxiv = Arc::new(arxiv);
    let hal = Arc::new(hal);
    let model = Arc::new(ScriptedModel::default());

    let mut registry = ConnectorRegistry::new();
    registry.register(arxiv.clone());
    registry.register(hal.clone());

    let cache = Arc::new(FingerprintCache::in_memory(EvictionPolicy::Count {
        max_entries: 16,
    }));
    let digest = Digest::new(config, Arc::new(registry), model.clone(), cache);
    Harness {
        digest,
        arxiv,
        hal,
        model,
    }
}

/// A few paragraphs long enough to need several chunks at `test_config`.
pub fn long_text() -> String {
    (0..6)
        .map(|i| {
            format!(
                "Section {} explains one more step of the approach in plain words. \
                 It reports the measurements that were taken and what they show.",
                i
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
