//! Extension traits for repositories and language models.
//!
//! Everything that talks to the outside world during `summarize` and
//! `search` sits behind one of two traits, so the pipeline can be driven by
//! the real HTTP clients in production and by in-process fakes in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  ┌───────────────┐  ┌───────────────┐    │
//! │  │ ArxivConnector│  │  HalConnector │ …  │
//! │  │  (Atom feed)  │  │  (Solr JSON)  │    │
//! │  └───────────────┘  └───────────────┘    │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!     Fetcher::fetch_article() / SearchAggregator::search()
//! ```
//!
//! ```text
//!   Summarizer ──► dyn LanguageModel ──► OpenAiChat | OllamaChat | test fake
//! ```
//!
//! # Usage
//!
//! ```rust
//! use paper_digest::traits::ConnectorRegistry;
//!
//! let connectors = ConnectorRegistry::new();
//! assert!(connectors.is_empty());
//! // connectors.register(Arc::new(MyConnector::new()));
//! ```

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::Config;
use crate::models::{Article, SearchResult, Source};
use crate::retry::CallError;

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// A client for one academic repository.
///
/// Implementations make exactly one remote attempt per call and classify
/// failures as [`CallError::Transient`] or [`CallError::Permanent`]; the
/// caller owns retry and backoff.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use paper_digest::models::{Article, SearchResult, Source};
/// use paper_digest::retry::CallError;
/// use paper_digest::traits::Connector;
///
/// pub struct OfflineArxiv;
///
/// #[async_trait]
/// impl Connector for OfflineArxiv {
///     fn source(&self) -> Source { Source::Arxiv }
///     fn description(&self) -> &str { "Always reports not found" }
///
///     async fn fetch_metadata(&self, id: &str) -> Result<Article, CallError> {
///         Err(CallError::permanent(anyhow::anyhow!("{} not found", id)))
///     }
///
///     async fn fetch_full_text(&self, _article: &Article) -> Result<Option<String>, CallError> {
///         Ok(None)
///     }
///
///     async fn search(&self, _query: &str, _max: usize) -> Result<Vec<SearchResult>, CallError> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// The repository this connector serves.
    fn source(&self) -> Source;

    /// Returns a one-line description of what this connector talks to.
    fn description(&self) -> &str;

    /// Fetch title, authors, abstract and file links for a canonical id.
    ///
    /// An id the repository does not know is a permanent failure.
    async fn fetch_metadata(&self, id: &str) -> Result<Article, CallError>;

    /// Download and extract the article's full text.
    ///
    /// `Ok(None)` means the repository has no downloadable file for it.
    async fn fetch_full_text(&self, article: &Article) -> Result<Option<String>, CallError>;

    /// Run a keyword query and return at most `max_results` hits in the
    /// repository's own relevance order.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchResult>, CallError>;
}

// ═══════════════════════════════════════════════════════════════════════
// LanguageModel Trait
// ═══════════════════════════════════════════════════════════════════════

/// A text-completion backend used by the summarizer.
///
/// One call is one attempt; retry policy lives in [`crate::llm::complete_with_retry`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// Send a single-turn prompt and return the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String, CallError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of repository connectors, at most one per [`Source`].
pub struct ConnectorRegistry {
    connectors: Vec<Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty connector registry.
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Create a registry with the built-in ArXiv and HAL connectors.
    pub fn with_builtins(config: &Config) -> Result<Self> {
        use crate::connector_arxiv::ArxivConnector;
        use crate::connector_hal::HalConnector;

        let mut registry = Self::new();
        registry.register(Arc::new(ArxivConnector::new(&config.fetch)?));
        registry.register(Arc::new(HalConnector::new(&config.fetch)?));
        Ok(registry)
    }

    /// Register a connector, replacing any existing one for the same source.
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let source = connector.source();
        self.connectors.retain(|c| c.source() != source);
        self.connectors.push(connector);
    }

    /// Look up the connector for `source`.
    pub fn find(&self, source: Source) -> Option<Arc<dyn Connector>> {
        self.connectors
            .iter()
            .find(|c| c.source() == source)
            .cloned()
    }

    /// Sources with a registered connector, in registration order.
    pub fn sources(&self) -> Vec<Source> {
        self.connectors.iter().map(|c| c.source()).collect()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(Source, &'static str);

    #[async_trait]
    impl Connector for Named {
        fn source(&self) -> Source {
            self.0
        }
        fn description(&self) -> &str {
            self.1
        }
        async fn fetch_metadata(&self, id: &str) -> Result<Article, CallError> {
            Err(CallError::permanent(anyhow::anyhow!("no {}", id)))
        }
        async fn fetch_full_text(&self, _article: &Article) -> Result<Option<String>, CallError> {
            Ok(None)
        }
        async fn search(&self, _q: &str, _n: usize) -> Result<Vec<SearchResult>, CallError> {
            Ok(vec![])
        }
    }

    #[test]
    fn register_replaces_same_source() {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(Named(Source::Arxiv, "first")));
        registry.register(Arc::new(Named(Source::Hal, "hal")));
        registry.register(Arc::new(Named(Source::Arxiv, "second")));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.sources(), vec![Source::Hal, Source::Arxiv]);
        assert_eq!(
            registry.find(Source::Arxiv).unwrap().description(),
            "second"
        );
    }

    #[test]
    fn builtins_cover_every_source() {
        let registry = ConnectorRegistry::with_builtins(&Config::default()).unwrap();
        for source in Source::ALL {
            assert!(registry.find(source).is_some(), "missing {}", source);
        }
    }
}
