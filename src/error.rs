//! Typed failures surfaced by the two public operations.
//!
//! Every variant carries enough context (offending URL, repository, attempt
//! count, underlying cause) for a caller to act on it. Degraded outcomes such
//! as abstract-only summaries are not errors; see
//! [`Limitation`](crate::models::Limitation).

use serde::Serialize;
use thiserror::Error;

use crate::models::{ArticleKey, Source};

/// One repository's failure during a multi-source search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: Source,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum DigestError {
    #[error("unsupported source: {url} does not belong to a known repository (arxiv, hal)")]
    UnsupportedSource { url: String },

    #[error("malformed {repository} identifier: no article id found in {url}")]
    MalformedIdentifier { url: String, repository: Source },

    #[error("failed to fetch {key} after {attempts} attempt(s): {cause}")]
    FetchFailed {
        key: ArticleKey,
        attempts: u32,
        cause: String,
    },

    #[error("language model unavailable after {attempts} attempt(s): {cause}")]
    LlmUnavailable { attempts: u32, cause: String },

    #[error("language model output malformed: {detail}")]
    LlmOutputMalformed { detail: String },

    #[error("search unavailable for '{query}': {}", describe_failures(.failures))]
    SearchUnavailable {
        query: String,
        failures: Vec<SourceFailure>,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DigestError {
    /// Machine-readable code used by the HTTP shell and `--json` output.
    pub fn code(&self) -> &'static str {
        match self {
            DigestError::UnsupportedSource { .. } => "unsupported_source",
            DigestError::MalformedIdentifier { .. } => "malformed_identifier",
            DigestError::FetchFailed { .. } => "fetch_failed",
            DigestError::LlmUnavailable { .. } => "llm_unavailable",
            DigestError::LlmOutputMalformed { .. } => "llm_output_malformed",
            DigestError::SearchUnavailable { .. } => "search_unavailable",
            DigestError::InvalidRequest(_) => "bad_request",
        }
    }

    /// Caller mistakes that retrying will never fix.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DigestError::UnsupportedSource { .. }
                | DigestError::MalformedIdentifier { .. }
                | DigestError::InvalidRequest(_)
        )
    }
}

fn describe_failures(failures: &[SourceFailure]) -> String {
    if failures.is_empty() {
        return "no sources requested".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} ({})", f.source, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
