//! Core data models used throughout paper-digest.
//!
//! These types represent the articles, chunks, summaries and search results
//! that flow through the intake and summarization pipeline, plus the response
//! shapes handed to the CLI and HTTP shell.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Academic repository an article comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Arxiv,
    Hal,
}

impl Source {
    /// Every supported repository, in the order searches report them.
    pub const ALL: [Source; 2] = [Source::Arxiv, Source::Hal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Arxiv => "arxiv",
            Source::Hal => "hal",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Ok(Source::Arxiv),
            "hal" => Ok(Source::Hal),
            other => Err(format!("unknown source '{}': expected arxiv or hal", other)),
        }
    }
}

/// Which repositories a search call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSelector {
    Arxiv,
    Hal,
    Both,
}

impl SourceSelector {
    /// The repositories covered by this selector, in reporting order.
    pub fn sources(&self) -> Vec<Source> {
        match self {
            SourceSelector::Arxiv => vec![Source::Arxiv],
            SourceSelector::Hal => vec![Source::Hal],
            SourceSelector::Both => Source::ALL.to_vec(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSelector::Arxiv => "arxiv",
            SourceSelector::Hal => "hal",
            SourceSelector::Both => "both",
        }
    }
}

impl fmt::Display for SourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "arxiv" => Ok(SourceSelector::Arxiv),
            "hal" => Ok(SourceSelector::Hal),
            "both" | "all" => Ok(SourceSelector::Both),
            other => Err(format!(
                "unsupported source '{}': expected arxiv, hal, or both",
                other
            )),
        }
    }
}

impl From<Source> for SourceSelector {
    fn from(source: Source) -> Self {
        match source {
            Source::Arxiv => SourceSelector::Arxiv,
            Source::Hal => SourceSelector::Hal,
        }
    }
}

/// Article identity (the cache fingerprint): repository plus canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArticleKey {
    pub source: Source,
    pub id: String,
}

impl ArticleKey {
    pub fn new(source: Source, id: impl Into<String>) -> Self {
        Self {
            source,
            id: id.into(),
        }
    }

    /// Canonical landing page for this article. Always resolvable back to `self`.
    pub fn canonical_url(&self) -> String {
        match self.source {
            Source::Arxiv => format!("https://arxiv.org/abs/{}", self.id),
            Source::Hal => format!("https://hal.science/{}", self.id),
        }
    }
}

impl fmt::Display for ArticleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// A fetched article. Immutable once built by the fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub source: Source,
    pub title: String,
    pub authors: Vec<String>,
    pub url: String,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub published: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

impl Article {
    pub fn key(&self) -> ArticleKey {
        ArticleKey::new(self.source, self.id.clone())
    }

    pub fn has_full_text(&self) -> bool {
        self.full_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// Text handed to the chunker: title, abstract and full text, each
    /// labelled and separated by a blank line. Absent parts are skipped.
    pub fn summarization_input(&self) -> String {
        let mut parts = Vec::new();
        if !self.title.trim().is_empty() {
            parts.push(format!("Title: {}", self.title.trim()));
        }
        if let Some(abstract_text) = self.abstract_text.as_deref() {
            if !abstract_text.trim().is_empty() {
                parts.push(format!("Abstract: {}", abstract_text.trim()));
            }
        }
        if self.has_full_text() {
            if let Some(full_text) = self.full_text.as_deref() {
                parts.push(format!("Full Text:\n{}", full_text.trim()));
            }
        }
        parts.join("\n\n")
    }
}

/// How a chunk's own content attaches to the end of the previous chunk's
/// own content when the article text is reassembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// First chunk of the article.
    Start,
    /// The chunk begins a new paragraph.
    Paragraph,
    /// The chunk begins a new sentence or word within a paragraph.
    Space,
    /// The chunk continues a word that was too long for a single chunk.
    Split,
}

impl Boundary {
    pub fn separator(&self) -> &'static str {
        match self {
            Boundary::Start | Boundary::Split => "",
            Boundary::Paragraph => "\n\n",
            Boundary::Space => " ",
        }
    }
}

/// A bounded slice of an article's text.
///
/// `text[..overlap_len]` repeats the tail of the previous chunk; the rest is
/// this chunk's own content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub article_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub token_count: usize,
    pub overlap_len: usize,
    pub boundary: Boundary,
    pub hash: String,
}

impl Chunk {
    /// The part of the chunk that is not repeated from its predecessor.
    pub fn own_text(&self) -> &str {
        self.text.get(self.overlap_len..).unwrap_or("")
    }
}

/// The single live summary for an article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub article_id: String,
    pub summary_text: String,
    /// Salience-ranked, case-insensitively unique.
    pub key_concepts: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A normalized search hit. `url` resolves back to `(source, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub source: Source,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

/// A degraded-but-successful outcome, reported next to the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Limitation {
    /// No extractable full text; the summary is built from title and abstract.
    AbstractOnly,
    /// Some sections could not be summarized and were left out.
    PartialSections { failed: usize, total: usize },
    /// The model ignored the output format; the raw output is the summary.
    MalformedModelOutput { detail: String },
    /// A requested search source failed and contributed no results.
    SourceOmitted { source: Source, reason: String },
}

/// Article fields echoed back by `summarize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleView {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub source: Source,
    pub url: String,
}

impl From<&Article> for ArticleView {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id.clone(),
            title: article.title.clone(),
            authors: article.authors.clone(),
            source: article.source,
            url: article.url.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeResponse {
    pub article: ArticleView,
    pub summary: String,
    pub key_concepts: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<Limitation>,
    /// True when the summary came straight from the fingerprint cache.
    #[serde(default)]
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub source: SourceSelector,
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub limitations: Vec<Limitation>,
}

/// A cached article whose summary is close to another one's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedArticle {
    pub article: ArticleView,
    /// Cosine similarity of the two summary embeddings.
    pub score: f32,
}

/// Format an author list for display: "A", "A and B", or "A et al.".
pub fn format_authors(authors: &[String]) -> String {
    match authors {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [first, ..] => format!("{} et al.", first),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_parses_case_insensitively() {
        assert_eq!("ArXiv".parse::<Source>().unwrap(), Source::Arxiv);
        assert_eq!(" hal ".parse::<Source>().unwrap(), Source::Hal);
        assert!("pubmed".parse::<Source>().is_err());
    }

    #[test]
    fn selector_expands_to_sources() {
        assert_eq!(SourceSelector::Both.sources(), vec![Source::Arxiv, Source::Hal]);
        assert_eq!("hal".parse::<SourceSelector>().unwrap().sources(), vec![Source::Hal]);
        assert!("scholar".parse::<SourceSelector>().is_err());
    }

    #[test]
    fn key_display_and_url() {
        let key = ArticleKey::new(Source::Arxiv, "2303.08774");
        assert_eq!(key.to_string(), "arxiv:2303.08774");
        assert_eq!(key.canonical_url(), "https://arxiv.org/abs/2303.08774");
        let hal = ArticleKey::new(Source::Hal, "hal-01234567");
        assert_eq!(hal.canonical_url(), "https://hal.science/hal-01234567");
    }

    #[test]
    fn summarization_input_skips_missing_parts() {
        let article = Article {
            id: "1".into(),
            source: Source::Hal,
            title: "A Title".into(),
            authors: vec![],
            url: "u".into(),
            full_text: None,
            abstract_text: Some("An abstract.".into()),
            published: None,
            updated: None,
            pdf_url: None,
        };
        assert_eq!(
            article.summarization_input(),
            "Title: A Title\n\nAbstract: An abstract."
        );
        assert!(!article.has_full_text());
    }

    #[test]
    fn authors_formatting() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(format_authors(&names(&[])), "");
        assert_eq!(format_authors(&names(&["Ada"])), "Ada");
        assert_eq!(format_authors(&names(&["Ada", "Alan"])), "Ada and Alan");
        assert_eq!(format_authors(&names(&["Ada", "Alan", "Grace"])), "Ada et al.");
    }

    #[test]
    fn limitation_serializes_with_kind_tag() {
        let limitation = Limitation::PartialSections { failed: 1, total: 4 };
        let json = serde_json::to_value(limitation).unwrap();
        assert_eq!(json["kind"], "partial_sections");
        assert_eq!(json["failed"], 1);
    }
}
