//! ArXiv connector.
//!
//! Talks to the public ArXiv export API, which answers both id lookups
//! (`id_list=`) and keyword searches (`search_query=`) with an Atom feed.
//! Full text comes from the article's PDF link.
//!
//! # Configuration
//!
//! ```toml
//! [fetch]
//! arxiv_api_url = "https://export.arxiv.org/api/query"
//! arxiv_pdf_url = "https://arxiv.org/pdf"
//! timeout_secs = 30
//! ```
//!
//! # Feed quirks
//!
//! - An unknown or malformed id yields either an empty feed or a single
//!   entry titled `Error` whose `<id>` points at `/api/errors`. Both are
//!   permanent "not found" failures.
//! - Titles and abstracts are hard-wrapped; whitespace is collapsed.
//! - Entry ids carry a version suffix (`…/abs/2303.08774v6`) that is
//!   stripped so results resolve back to the canonical identity.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use std::time::Duration;

use crate::config::FetchConfig;
use crate::extract::{collapse_whitespace, download_text};
use crate::models::{Article, ArticleKey, SearchResult, Source};
use crate::resolve::arxiv_id_from_atom_id;
use crate::retry::CallError;
use crate::traits::Connector;

const SERVICE: &str = "ArXiv API";

/// Field prefixes understood by `search_query`.
const QUERY_FIELDS: [&str; 9] = [
    "ti:", "au:", "abs:", "co:", "jr:", "cat:", "rn:", "id:", "all:",
];

/// Connector for `arxiv.org`.
pub struct ArxivConnector {
    client: reqwest::Client,
    api_url: String,
    pdf_url: String,
}

impl ArxivConnector {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("paper-digest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build ArXiv HTTP client")?;
        Ok(Self {
            client,
            api_url: config.arxiv_api_url.clone(),
            pdf_url: config.arxiv_pdf_url.trim_end_matches('/').to_string(),
        })
    }

    async fn query_feed(&self, params: &[(&str, String)]) -> Result<String, CallError> {
        let resp = self.client.get(&self.api_url).query(params).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(CallError::from_status(SERVICE, status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl Connector for ArxivConnector {
    fn source(&self) -> Source {
        Source::Arxiv
    }

    fn description(&self) -> &str {
        "ArXiv export API (Atom feed)"
    }

    async fn fetch_metadata(&self, id: &str) -> Result<Article, CallError> {
        let body = self
            .query_feed(&[("id_list", id.to_string()), ("max_results", "1".to_string())])
            .await?;
        let feed = parse_feed(&body).map_err(CallError::permanent)?;

        let entry = feed
            .entries
            .into_iter()
            .find(|e| !e.is_error())
            .ok_or_else(|| CallError::permanent(anyhow!("arxiv:{} not found", id)))?;
        Ok(entry.into_article(id))
    }

    async fn fetch_full_text(&self, article: &Article) -> Result<Option<String>, CallError> {
        let url = article
            .pdf_url
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.pdf_url, article.id));
        download_text(&self.client, "ArXiv PDF", &url).await
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, CallError> {
        let body = self
            .query_feed(&[
                ("search_query", build_search_query(query)),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
                ("sortBy", "relevance".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .await?;
        let feed = parse_feed(&body).map_err(CallError::permanent)?;

        if let Some(err) = feed.entries.iter().find(|e| e.is_error()) {
            return Err(CallError::permanent(anyhow!(
                "ArXiv rejected query: {}",
                err.summary.trim()
            )));
        }

        Ok(feed
            .entries
            .into_iter()
            .filter_map(AtomEntry::into_search_result)
            .take(max_results)
            .collect())
    }
}

/// Prefix a bare query with `all:` so it matches every field.
pub fn build_search_query(query: &str) -> String {
    let query = query.trim();
    let lower = query.to_ascii_lowercase();
    if QUERY_FIELDS.iter().any(|f| lower.starts_with(f)) {
        query.to_string()
    } else {
        format!("all:{}", query)
    }
}

// ============ Atom parsing ============

#[derive(Debug, Default)]
pub struct AtomFeed {
    pub total_results: Option<usize>,
    pub entries: Vec<AtomEntry>,
}

#[derive(Debug, Default, Clone)]
pub struct AtomEntry {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub published: String,
    pub updated: String,
    pub authors: Vec<String>,
    pub pdf_url: Option<String>,
}

impl AtomEntry {
    fn is_error(&self) -> bool {
        self.id.contains("/api/errors") || self.title.trim() == "Error"
    }

    fn into_article(self, requested_id: &str) -> Article {
        let id = arxiv_id_from_atom_id(&self.id).unwrap_or_else(|| requested_id.to_string());
        let key = ArticleKey::new(Source::Arxiv, id.clone());
        Article {
            id,
            source: Source::Arxiv,
            title: collapse_whitespace(&self.title),
            authors: self.authors,
            url: key.canonical_url(),
            full_text: None,
            abstract_text: non_empty(collapse_whitespace(&self.summary)),
            published: non_empty(self.published),
            updated: non_empty(self.updated),
            pdf_url: self.pdf_url,
        }
    }

    fn into_search_result(self) -> Option<SearchResult> {
        let id = arxiv_id_from_atom_id(&self.id)?;
        let url = ArticleKey::new(Source::Arxiv, id.clone()).canonical_url();
        Some(SearchResult {
            id,
            source: Source::Arxiv,
            title: collapse_whitespace(&self.title),
            authors: self.authors,
            abstract_text: non_empty(collapse_whitespace(&self.summary)),
            url,
            published: non_empty(self.published),
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    Updated,
    AuthorName,
    TotalResults,
}

/// Parse an ArXiv Atom response.
pub fn parse_feed(xml: &str) -> Result<AtomFeed> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut buf = Vec::new();

    let mut feed = AtomFeed::default();
    let mut entry: Option<AtomEntry> = None;
    let mut in_author = false;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => entry = Some(AtomEntry::default()),
                    b"author" if entry.is_some() => in_author = true,
                    b"name" if in_author => field = Some(Field::AuthorName),
                    b"totalResults" => field = Some(Field::TotalResults),
                    b"link" => read_link(&e, entry.as_mut()),
                    other if entry.is_some() && !in_author => {
                        field = match other {
                            b"id" => Some(Field::Id),
                            b"title" => Some(Field::Title),
                            b"summary" => Some(Field::Summary),
                            b"published" => Some(Field::Published),
                            b"updated" => Some(Field::Updated),
                            _ => None,
                        };
                    }
                    _ => {}
                }
                text.clear();
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"link" {
                    read_link(&e, entry.as_mut());
                }
            }
            Ok(Event::Text(t)) => {
                if field.is_some() {
                    text.push_str(&t.unescape().unwrap_or_default());
                }
            }
            Ok(Event::CData(t)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"entry" => {
                        if let Some(done) = entry.take() {
                            feed.entries.push(done);
                        }
                        in_author = false;
                    }
                    b"author" => in_author = false,
                    _ => {}
                }
                if let Some(f) = field.take() {
                    let value = std::mem::take(&mut text);
                    store_field(&mut feed, entry.as_mut(), f, value);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow!(
                    "malformed Atom feed at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(feed)
}

fn store_field(feed: &mut AtomFeed, entry: Option<&mut AtomEntry>, field: Field, value: String) {
    if field == Field::TotalResults {
        feed.total_results = value.trim().parse().ok();
        return;
    }
    let Some(entry) = entry else { return };
    match field {
        Field::Id => entry.id = value.trim().to_string(),
        Field::Title => entry.title = value,
        Field::Summary => entry.summary = value,
        Field::Published => entry.published = value.trim().to_string(),
        Field::Updated => entry.updated = value.trim().to_string(),
        Field::AuthorName => {
            let name = collapse_whitespace(&value);
            if !name.is_empty() {
                entry.authors.push(name);
            }
        }
        Field::TotalResults => {}
    }
}

fn read_link(e: &BytesStart<'_>, entry: Option<&mut AtomEntry>) {
    let Some(entry) = entry else { return };
    let mut href = None;
    let mut is_pdf = false;
    for attr in e.attributes().flatten() {
        let value = attr.unescape_value().unwrap_or_default().into_owned();
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value),
            b"title" if value == "pdf" => is_pdf = true,
            b"type" if value == "application/pdf" => is_pdf = true,
            _ => {}
        }
    }
    if is_pdf && entry.pdf_url.is_none() {
        entry.pdf_url = href;
    }
}
