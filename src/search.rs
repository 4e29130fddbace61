//! Multi-source keyword search.
//!
//! Each requested repository is queried concurrently. Every attempt runs
//! under the search timeout, and transient failures (including timeouts) are
//! retried with backoff. A repository that still fails contributes nothing and is reported as a
//! [`Limitation::SourceOmitted`]; the call fails only when every requested
//! repository fails.
//!
//! Results from several repositories are interleaved round-robin in
//! [`Source::ALL`] order and truncated to `max_results`:
//!
//! ```text
//! arxiv: a1 a2 a3        hal: h1 h2
//!            └──► a1 h1 a2 h2 a3
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::config::SearchConfig;
use crate::error::{DigestError, SourceFailure};
use crate::models::{Limitation, SearchResponse, SearchResult, Source, SourceSelector};
use crate::retry::{retry, CallError, RetryError, RetryPolicy};
use crate::traits::{Connector, ConnectorRegistry};

pub struct SearchAggregator {
    registry: Arc<ConnectorRegistry>,
    timeout: Duration,
    policy: RetryPolicy,
    max_results_cap: usize,
}

impl SearchAggregator {
    pub fn new(registry: Arc<ConnectorRegistry>, config: &SearchConfig) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(config.timeout_secs),
            policy: config.retry_policy(),
            max_results_cap: config.max_results_cap.max(1),
        }
    }

    /// Search the repositories named by `selector`.
    ///
    /// # Errors
    ///
    /// - [`DigestError::InvalidRequest`] for an empty query or `max_results == 0`.
    /// - [`DigestError::SearchUnavailable`] when every requested source failed.
    pub async fn search(
        &self,
        query: &str,
        selector: SourceSelector,
        max_results: usize,
    ) -> Result<SearchResponse, DigestError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DigestError::InvalidRequest(
                "query must not be empty".to_string(),
            ));
        }
        if max_results == 0 {
            return Err(DigestError::InvalidRequest(
                "max_results must be at least 1".to_string(),
            ));
        }
        let max_results = max_results.min(self.max_results_cap);
        let sources = selector.sources();

        let mut set = JoinSet::new();
        let mut failures = Vec::new();
        for source in &sources {
            let Some(connector) = self.registry.find(*source) else {
                failures.push(SourceFailure {
                    source: *source,
                    reason: "no connector registered".to_string(),
                });
                continue;
            };
            let query = query.to_string();
            let timeout = self.timeout;
            let policy = self.policy;
            let source = *source;
            set.spawn(async move {
                let outcome =
                    search_source(connector.as_ref(), &query, max_results, timeout, &policy).await;
                let outcome = outcome
                    .map_err(|e| format!("{} (after {} attempt(s))", e.cause(), e.attempts));
                (source, outcome)
            });
        }

        let mut per_source: Vec<(Source, Vec<SearchResult>)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((source, Ok(results))) => {
                    tracing::debug!(%source, hits = results.len(), "source search finished");
                    per_source.push((source, results));
                }
                Ok((source, Err(reason))) => failures.push(SourceFailure { source, reason }),
                Err(e) => tracing::warn!(error = %e, "search task aborted"),
            }
        }

        // Tasks that panicked leave no record of their source.
        for source in &sources {
            let answered = per_source.iter().any(|(s, _)| s == source)
                || failures.iter().any(|f| f.source == *source);
            if !answered {
                failures.push(SourceFailure {
                    source: *source,
                    reason: "search task aborted".to_string(),
                });
            }
        }

        failures.sort_by_key(|f| f.source);
        for failure in &failures {
            tracing::warn!(
                source = %failure.source,
                reason = %failure.reason,
                "search source omitted"
            );
        }

        if per_source.is_empty() {
            return Err(DigestError::SearchUnavailable {
                query: query.to_string(),
                failures,
            });
        }

        per_source.sort_by_key(|(s, _)| *s);
        let results = interleave(per_source.into_iter().map(|(_, r)| r).collect(), max_results);
        tracing::info!(query, source = %selector, results = results.len(), "search finished");

        Ok(SearchResponse {
            query: query.to_string(),
            source: selector,
            results,
            limitations: failures
                .into_iter()
                .map(|f| Limitation::SourceOmitted {
                    source: f.source,
                    reason: f.reason,
                })
                .collect(),
        })
    }
}

/// One repository's search, retried under `policy`. An attempt that outlives
/// `timeout` counts as a transient failure.
async fn search_source(
    connector: &dyn Connector,
    query: &str,
    max_results: usize,
    timeout: Duration,
    policy: &RetryPolicy,
) -> Result<Vec<SearchResult>, RetryError> {
    let what = format!("{} search", connector.source());
    retry(policy, &what, |_| async move {
        match tokio::time::timeout(timeout, connector.search(query, max_results)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::transient(anyhow::anyhow!(
                "timed out after {}s",
                timeout.as_secs()
            ))),
        }
    })
    .await
}

/// Round-robin merge of per-source lists, truncated to `limit`.
pub fn interleave(lists: Vec<Vec<SearchResult>>, limit: usize) -> Vec<SearchResult> {
    let mut iters: Vec<_> = lists.into_iter().map(|l| l.into_iter()).collect();
    let mut out = Vec::new();
    while out.len() < limit {
        let mut progressed = false;
        for it in iters.iter_mut() {
            if out.len() == limit {
                break;
            }
            if let Some(r) = it.next() {
                out.push(r);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }
    out
}
