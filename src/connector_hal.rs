//! HAL connector.
//!
//! HAL exposes a Solr search endpoint that returns JSON. Id lookups are
//! ordinary searches filtered on `halId_s`; keyword searches use the
//! default relevance ordering. Full text comes from the deposited main
//! file (`fileMain_s`), falling back to the first attached PDF.
//!
//! Solr multi-valued fields (`title_s`, `abstract_s`, `authFullName_s`,
//! `files_s`) arrive as arrays, but single-valued responses have been seen
//! for some records, so both shapes are accepted.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::config::FetchConfig;
use crate::extract::{collapse_whitespace, download_text};
use crate::models::{Article, ArticleKey, SearchResult, Source};
use crate::resolve::normalize_hal_id;
use crate::retry::CallError;
use crate::traits::Connector;

const SERVICE: &str = "HAL API";

const FIELDS: &str =
    "halId_s,title_s,abstract_s,authFullName_s,uri_s,fileMain_s,files_s,producedDate_s";

/// Connector for `hal.science`.
pub struct HalConnector {
    client: reqwest::Client,
    api_url: String,
}

impl HalConnector {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("paper-digest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HAL HTTP client")?;
        Ok(Self {
            client,
            api_url: config.hal_api_url.clone(),
        })
    }

    async fn select(&self, query: &str, rows: usize) -> Result<SolrResponse, CallError> {
        let resp = self
            .client
            .get(&self.api_url)
            .query(&[
                ("q", query.to_string()),
                ("fl", FIELDS.to_string()),
                ("rows", rows.to_string()),
                ("wt", "json".to_string()),
            ])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(CallError::from_status(SERVICE, status, &body));
        }
        parse_response(&body).map_err(CallError::permanent)
    }
}

#[async_trait]
impl Connector for HalConnector {
    fn source(&self) -> Source {
        Source::Hal
    }

    fn description(&self) -> &str {
        "HAL open archive (Solr JSON API)"
    }

    async fn fetch_metadata(&self, id: &str) -> Result<Article, CallError> {
        let response = self.select(&format!("halId_s:\"{}\"", id), 1).await?;
        response
            .docs
            .into_iter()
            .find_map(HalDoc::into_article)
            .ok_or_else(|| CallError::permanent(anyhow!("hal:{} not found", id)))
    }

    async fn fetch_full_text(&self, article: &Article) -> Result<Option<String>, CallError> {
        match article.pdf_url.as_deref() {
            Some(url) => download_text(&self.client, "HAL file", url).await,
            None => Ok(None),
        }
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, CallError> {
        let response = self.select(query.trim(), max_results).await?;
        Ok(response
            .docs
            .into_iter()
            .filter_map(HalDoc::into_search_result)
            .take(max_results)
            .collect())
    }
}

// ============ Solr JSON ============

#[derive(Debug, Deserialize)]
struct SolrEnvelope {
    response: SolrResponse,
}

#[derive(Debug, Deserialize)]
pub struct SolrResponse {
    #[serde(rename = "numFound", default)]
    pub num_found: u64,
    #[serde(default)]
    pub docs: Vec<HalDoc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HalDoc {
    #[serde(rename = "halId_s")]
    pub hal_id: Option<String>,
    #[serde(rename = "title_s", default, deserialize_with = "one_or_many")]
    pub titles: Vec<String>,
    #[serde(rename = "abstract_s", default, deserialize_with = "one_or_many")]
    pub abstracts: Vec<String>,
    #[serde(rename = "authFullName_s", default, deserialize_with = "one_or_many")]
    pub authors: Vec<String>,
    #[serde(rename = "uri_s")]
    pub uri: Option<String>,
    #[serde(rename = "fileMain_s")]
    pub file_main: Option<String>,
    #[serde(rename = "files_s", default, deserialize_with = "one_or_many")]
    pub files: Vec<String>,
    #[serde(rename = "producedDate_s")]
    pub produced_date: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
        None => Vec::new(),
    })
}

impl HalDoc {
    fn canonical_id(&self) -> Option<String> {
        self.hal_id.as_deref().and_then(normalize_hal_id)
    }

    fn title(&self) -> String {
        self.titles
            .first()
            .map(|t| collapse_whitespace(t))
            .unwrap_or_default()
    }

    fn abstract_text(&self) -> Option<String> {
        self.abstracts
            .first()
            .map(|a| collapse_whitespace(a))
            .filter(|a| !a.is_empty())
    }

    fn file_url(&self) -> Option<String> {
        self.file_main
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                self.files
                    .iter()
                    .find(|f| f.to_ascii_lowercase().ends_with(".pdf"))
                    .cloned()
            })
    }

    fn into_article(self) -> Option<Article> {
        let id = self.canonical_id()?;
        let key = ArticleKey::new(Source::Hal, id.clone());
        Some(Article {
            title: self.title(),
            abstract_text: self.abstract_text(),
            pdf_url: self.file_url(),
            url: key.canonical_url(),
            id,
            source: Source::Hal,
            authors: self.authors,
            full_text: None,
            published: self.produced_date,
            updated: None,
        })
    }

    fn into_search_result(self) -> Option<SearchResult> {
        let id = self.canonical_id()?;
        let key = ArticleKey::new(Source::Hal, id.clone());
        Some(SearchResult {
            title: self.title(),
            abstract_text: self.abstract_text(),
            url: key.canonical_url(),
            id,
            source: Source::Hal,
            authors: self.authors,
            published: self.produced_date,
        })
    }
}

/// Parse a HAL search response body.
pub fn parse_response(body: &str) -> Result<SolrResponse> {
    let envelope: SolrEnvelope =
        serde_json::from_str(body).context("unexpected HAL response shape")?;
    Ok(envelope.response)
}
