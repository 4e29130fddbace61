//! The two public operations, wired together.
//!
//! ```text
//! summarize(url)
//!   resolve ─► cache lookup ─┬─ summary present ─────────────────► response (cached)
//!                            ├─ entry without summary ─┐
//!                            └─ miss ─► fetch ─► chunk ┴─► map ─► reduce ─► store ─► response
//!
//! search(query, source, max_results)
//!   aggregator ─► per-source connectors ─► interleave ─► response
//! ```
//!
//! The cache is the only state shared between calls. Whatever was computed
//! before a failure (fetched article, chunks, partial summaries) is stored,
//! so retrying the same URL resumes instead of starting over.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;

use crate::cache::{CacheEntry, FingerprintCache};
use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{create_provider, embed_one, EmbeddingProvider};
use crate::error::DigestError;
use crate::fetch::Fetcher;
use crate::llm::{create_model, UnconfiguredModel};
use crate::models::{
    ArticleKey, ArticleView, Limitation, RelatedArticle, SearchResponse, SourceSelector,
    SummarizeResponse, SummaryRecord,
};
use crate::resolve::resolve_url;
use crate::search::SearchAggregator;
use crate::summarize::Summarizer;
use crate::traits::{ConnectorRegistry, LanguageModel};

pub struct Digest {
    config: Config,
    fetcher: Fetcher,
    cache: Arc<FingerprintCache>,
    summarizer: Summarizer,
    aggregator: SearchAggregator,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl Digest {
    /// Assemble from explicit parts. Embeddings stay off until
    /// [`with_embedder`](Self::with_embedder) is called.
    pub fn new(
        config: Config,
        registry: Arc<ConnectorRegistry>,
        model: Arc<dyn LanguageModel>,
        cache: Arc<FingerprintCache>,
    ) -> Self {
        Self {
            fetcher: Fetcher::new(registry.clone(), &config.fetch),
            summarizer: Summarizer::new(model, &config.llm),
            aggregator: SearchAggregator::new(registry, &config.search),
            cache,
            embedder: None,
            config,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Build the production stack: built-in connectors, the configured
    /// model, the cache (restoring its snapshot) and optional embeddings.
    pub fn from_config(config: Config) -> Result<Self> {
        let registry = Arc::new(ConnectorRegistry::with_builtins(&config)?);
        let model = match create_model(&config.llm) {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(error = %e, "language model not configured; summarize will fail");
                Arc::new(UnconfiguredModel::new(config.llm.model.clone(), e.to_string()))
            }
        };
        let cache = Arc::new(FingerprintCache::open(&config.cache)?);
        let embedder = if config.embedding.is_enabled() {
            Some(create_provider(&config.embedding)?)
        } else {
            None
        };

        let mut digest = Self::new(config, registry, model, cache);
        digest.embedder = embedder;
        tracing::info!(
            model = digest.summarizer.model_name(),
            embeddings = digest.embedder.is_some(),
            "digest service ready"
        );
        Ok(digest)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    /// Summarize the article behind `url`.
    ///
    /// A cached summary is returned without any network call.
    pub async fn summarize(&self, url: &str) -> Result<SummarizeResponse, DigestError> {
        let key = resolve_url(url)?;

        let previous = self.cache.lookup(&key);
        if let Some(entry) = &previous {
            if let Some(summary) = &entry.summary {
                tracing::info!(article = %key, "summary cache hit");
                return Ok(SummarizeResponse {
                    article: ArticleView::from(&entry.article),
                    summary: summary.summary_text.clone(),
                    key_concepts: summary.key_concepts.clone(),
                    limitations: entry.limitations.clone(),
                    cached: true,
                });
            }
        }

        let mut entry = match previous {
            Some(entry) => {
                tracing::info!(article = %key, "resuming from cached partial state");
                let mut entry = entry.as_ref().clone();
                entry.limitations.retain(|l| matches!(l, Limitation::AbstractOnly));
                entry
            }
            None => self.prepare(&key).await?,
        };

        let outcome = self
            .summarizer
            .summarize(&entry.chunks, &mut entry.partials)
            .await;
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.cache.store(key, entry);
                return Err(e);
            }
        };

        entry.limitations.extend(outcome.limitations);
        entry.summary_vector = self.embed_summary(&key, &outcome.summary).await;
        entry.summary = Some(SummaryRecord {
            article_id: entry.article.id.clone(),
            summary_text: outcome.summary,
            key_concepts: outcome.key_concepts,
            created_at: Utc::now(),
        });

        let stored = self.cache.store(key.clone(), entry);
        tracing::info!(
            article = %key,
            chunks = stored.chunks.len(),
            limitations = stored.limitations.len(),
            "article summarized"
        );

        let summary = stored.summary.as_ref();
        Ok(SummarizeResponse {
            article: ArticleView::from(&stored.article),
            summary: summary.map(|s| s.summary_text.clone()).unwrap_or_default(),
            key_concepts: summary.map(|s| s.key_concepts.clone()).unwrap_or_default(),
            limitations: stored.limitations.clone(),
            cached: false,
        })
    }

    /// Fetch and chunk an article that has never been seen.
    async fn prepare(&self, key: &ArticleKey) -> Result<CacheEntry, DigestError> {
        tracing::info!(article = %key, "summary cache miss");
        let article = self.fetcher.fetch_article(key).await?;
        let chunks = chunk_text(
            &article.id,
            &article.summarization_input(),
            &self.config.chunking,
        );
        tracing::debug!(article = %key, chunks = chunks.len(), "article chunked");

        let abstract_only = !article.has_full_text();
        let mut entry = CacheEntry::new(article, chunks);
        if abstract_only {
            entry.limitations.push(Limitation::AbstractOnly);
        }
        Ok(entry)
    }

    async fn embed_summary(&self, key: &ArticleKey, summary: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embed_one(embedder.as_ref(), summary).await {
            Ok(vector) => Some(vector),
            Err(e) => {
                let error = format!("{:#}", e);
                tracing::warn!(article = %key, %error, "summary embedding failed");
                None
            }
        }
    }

    /// Keyword search across one or both repositories.
    pub async fn search(
        &self,
        query: &str,
        selector: SourceSelector,
        max_results: usize,
    ) -> Result<SearchResponse, DigestError> {
        self.aggregator.search(query, selector, max_results).await
    }

    /// Cached articles whose summaries are most similar to the summary of
    /// the article behind `url`. The article itself is excluded.
    ///
    /// # Errors
    ///
    /// [`DigestError::InvalidRequest`] when embeddings are disabled or the
    /// article has no embedded summary in the cache yet.
    pub async fn related(&self, url: &str, k: usize) -> Result<Vec<RelatedArticle>, DigestError> {
        let key = resolve_url(url)?;
        if self.embedder.is_none() {
            return Err(DigestError::InvalidRequest(
                "related articles require embeddings; set [embedding] provider in config"
                    .to_string(),
            ));
        }
        let vector = self
            .cache
            .lookup(&key)
            .and_then(|e| e.summary_vector.clone())
            .ok_or_else(|| {
                DigestError::InvalidRequest(format!(
                    "{} has no cached summary embedding; summarize it first",
                    key
                ))
            })?;

        Ok(self
            .cache
            .nearest(&vector, k.saturating_add(1))
            .into_iter()
            .filter(|n| n.key != key)
            .take(k)
            .map(|n| RelatedArticle {
                article: ArticleView::from(&n.entry.article),
                score: n.score,
            })
            .collect())
    }

    /// Drop the cached state for the article behind `url`, summary and
    /// partials alike. Returns whether anything was cached.
    pub fn forget(&self, url: &str) -> Result<bool, DigestError> {
        let key = resolve_url(url)?;
        let removed = self.cache.remove(&key).is_some();
        tracing::info!(article = %key, removed, "forgot cached article");
        Ok(removed)
    }

    /// Persist the cache snapshot, if configured.
    pub fn shutdown(&self) -> Result<()> {
        self.cache.shutdown()
    }
}
