//! Article fetcher.
//!
//! Given a resolved [`ArticleKey`], asks the repository's connector for
//! metadata (with bounded retry) and then, best effort, for full text.
//! Metadata failure is fatal ([`DigestError::FetchFailed`]); full-text
//! failure only downgrades the article to abstract-only.

use std::sync::Arc;

use crate::config::FetchConfig;
use crate::error::DigestError;
use crate::models::{Article, ArticleKey};
use crate::retry::{retry, RetryPolicy};
use crate::traits::ConnectorRegistry;

pub struct Fetcher {
    registry: Arc<ConnectorRegistry>,
    policy: RetryPolicy,
    full_text: bool,
}

impl Fetcher {
    pub fn new(registry: Arc<ConnectorRegistry>, config: &FetchConfig) -> Self {
        Self {
            registry,
            policy: config.retry_policy(),
            full_text: config.full_text,
        }
    }

    /// Fetch metadata and (when enabled) full text for `key`.
    pub async fn fetch_article(&self, key: &ArticleKey) -> Result<Article, DigestError> {
        let connector = self
            .registry
            .find(key.source)
            .ok_or_else(|| DigestError::FetchFailed {
                key: key.clone(),
                attempts: 0,
                cause: format!("no connector registered for {}", key.source),
            })?;

        let what = format!("fetch metadata for {}", key);
        let mut article = retry(&self.policy, &what, |_| connector.fetch_metadata(&key.id))
            .await
            .map_err(|e| DigestError::FetchFailed {
                key: key.clone(),
                attempts: e.attempts,
                cause: e.cause(),
            })?;

        // The connector may echo a versioned or differently-cased id.
        article.id = key.id.clone();
        article.source = key.source;
        article.url = key.canonical_url();

        if self.full_text {
            let what = format!("fetch full text for {}", key);
            let outcome = retry(&self.policy, &what, |_| connector.fetch_full_text(&article)).await;
            match outcome {
                Ok(text) => article.full_text = text,
                Err(e) => {
                    tracing::warn!(
                        article = %key,
                        attempts = e.attempts,
                        error = %e.cause(),
                        "full text unavailable, continuing with abstract"
                    );
                    article.full_text = None;
                }
            }
        }

        tracing::debug!(
            article = %key,
            title = %article.title,
            full_text = article.has_full_text(),
            "fetched article"
        );
        Ok(article)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SearchResult, Source};
    use crate::retry::CallError;
    use crate::traits::Connector;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails metadata `fail_first` times with a transient error.
    struct Flaky {
        fail_first: u32,
        metadata_calls: AtomicU32,
        fail_full_text: bool,
    }

    impl Flaky {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                metadata_calls: AtomicU32::new(0),
                fail_full_text: false,
            }
        }
    }

    #[async_trait]
    impl Connector for Flaky {
        fn source(&self) -> Source {
            Source::Arxiv
        }
        fn description(&self) -> &str {
            "flaky"
        }
        async fn fetch_metadata(&self, id: &str) -> Result<Article, CallError> {
            let n = self.metadata_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.fail_first {
                return Err(CallError::transient(anyhow::anyhow!("HTTP 503")));
            }
            Ok(Article {
                id: format!("{}v2", id),
                source: Source::Arxiv,
                title: "T".into(),
                authors: vec!["A".into()],
                url: "http://arxiv.org/abs/x".into(),
                full_text: None,
                abstract_text: Some("Abs.".into()),
                published: None,
                updated: None,
                pdf_url: None,
            })
        }
        async fn fetch_full_text(&self, _article: &Article) -> Result<Option<String>, CallError> {
            if self.fail_full_text {
                Err(CallError::permanent(anyhow::anyhow!("corrupt pdf")))
            } else {
                Ok(Some("Body text.".into()))
            }
        }
        async fn search(&self, _q: &str, _n: usize) -> Result<Vec<SearchResult>, CallError> {
            Ok(vec![])
        }
    }

    fn fetcher(connector: Arc<Flaky>, max_attempts: u32) -> Fetcher {
        let mut registry = ConnectorRegistry::new();
        registry.register(connector);
        let config = FetchConfig {
            max_attempts,
            backoff_base_ms: 1,
            ..FetchConfig::default()
        };
        Fetcher::new(Arc::new(registry), &config)
    }

    #[tokio::test]
    async fn retries_transient_metadata_failures() {
        let connector = Arc::new(Flaky::new(2));
        let fetcher = fetcher(connector.clone(), 3);
        let key = ArticleKey::new(Source::Arxiv, "2303.08774");

        let article = fetcher.fetch_article(&key).await.unwrap();
        assert_eq!(connector.metadata_calls.load(Ordering::SeqCst), 3);
        assert_eq!(article.id, "2303.08774");
        assert_eq!(article.url, "https://arxiv.org/abs/2303.08774");
        assert_eq!(article.full_text.as_deref(), Some("Body text."));
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_with_count() {
        let connector = Arc::new(Flaky::new(10));
        let fetcher = fetcher(connector.clone(), 3);
        let key = ArticleKey::new(Source::Arxiv, "2303.08774");

        match fetcher.fetch_article(&key).await {
            Err(DigestError::FetchFailed { attempts, key: k, .. }) => {
                assert_eq!(attempts, 3);
                assert_eq!(k, key);
            }
            other => panic!("expected FetchFailed, got {:?}", other),
        }
        assert_eq!(connector.metadata_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn full_text_failure_degrades_to_abstract() {
        let mut flaky = Flaky::new(0);
        flaky.fail_full_text = true;
        let fetcher = fetcher(Arc::new(flaky), 3);

        let article = fetcher
            .fetch_article(&ArticleKey::new(Source::Arxiv, "2303.08774"))
            .await
            .unwrap();
        assert!(!article.has_full_text());
        assert_eq!(article.abstract_text.as_deref(), Some("Abs."));
    }

    #[tokio::test]
    async fn missing_connector_is_fetch_failure() {
        let fetcher = Fetcher::new(Arc::new(ConnectorRegistry::new()), &FetchConfig::default());
        let err = fetcher
            .fetch_article(&ArticleKey::new(Source::Hal, "hal-01234567"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "fetch_failed");
    }
}
