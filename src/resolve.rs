//! URL → article identity.
//!
//! Classifies an article URL by host and extracts the repository's canonical
//! identifier. Resolution is pure and deterministic: scheme, `www.`, query
//! string, fragment, `.pdf` suffix and version suffix (`v2`) never change the
//! result, so `/abs/X`, `/pdf/Xv3.pdf` and `http://www.arxiv.org/abs/X?ctx=1`
//! all land on the same cache fingerprint.
//!
//! | Repository | Hosts | Id shapes |
//! |---|---|---|
//! | ArXiv | `arxiv.org`, `*.arxiv.org` | `2303.08774`, `hep-th/9901001` under `/abs/`, `/pdf/`, `/html/` |
//! | HAL | `hal.science`, `*.hal.science`, `*.archives-ouvertes.fr` | `hal-01234567`, `tel-…`, `halshs-…` in any path segment |

use std::sync::OnceLock;

use regex::Regex;
use reqwest::Url;

use crate::error::DigestError;
use crate::models::{ArticleKey, Source};

fn arxiv_new_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{4}\.\d{4,5})(?:v\d+)?$").expect("valid regex"))
}

fn arxiv_old_style() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([a-z][a-z\-]*(?:\.[A-Za-z]{2})?/\d{7})(?:v\d+)?$").expect("valid regex")
    })
}

fn hal_id() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^([a-z][a-z0-9]*-\d{5,})(?:v\d+)?$").expect("valid regex"))
}

/// Resolve an article URL to its `(source, canonical_id)` identity.
///
/// # Errors
///
/// - [`DigestError::UnsupportedSource`] when the URL cannot be parsed or its
///   host is not a known repository.
/// - [`DigestError::MalformedIdentifier`] when the host is known but no id
///   can be extracted from the path.
pub fn resolve_url(raw: &str) -> Result<ArticleKey, DigestError> {
    let trimmed = raw.trim();
    let unsupported = || DigestError::UnsupportedSource {
        url: trimmed.to_string(),
    };

    let url = parse_lenient(trimmed).ok_or_else(unsupported)?;
    let host = url.host_str().ok_or_else(unsupported)?.to_ascii_lowercase();
    let source = classify_host(&host).ok_or_else(unsupported)?;

    let id = match source {
        Source::Arxiv => arxiv_id_from_path(url.path()),
        Source::Hal => hal_id_from_path(url.path()),
    };

    id.map(|id| ArticleKey::new(source, id))
        .ok_or_else(|| DigestError::MalformedIdentifier {
            url: trimmed.to_string(),
            repository: source,
        })
}

/// Which repository serves `host`, if any.
pub fn classify_host(host: &str) -> Option<Source> {
    let host = host.trim_end_matches('.');
    if host == "arxiv.org" || host.ends_with(".arxiv.org") {
        Some(Source::Arxiv)
    } else if host == "hal.science"
        || host.ends_with(".hal.science")
        || host == "archives-ouvertes.fr"
        || host.ends_with(".archives-ouvertes.fr")
    {
        Some(Source::Hal)
    } else {
        None
    }
}

fn parse_lenient(raw: &str) -> Option<Url> {
    if raw.is_empty() {
        return None;
    }
    let url = if raw.contains("://") {
        Url::parse(raw).ok()?
    } else {
        Url::parse(&format!("https://{}", raw)).ok()?
    };
    match url.scheme() {
        "http" | "https" => Some(url),
        _ => None,
    }
}

fn arxiv_id_from_path(path: &str) -> Option<String> {
    let path = path.trim_start_matches('/');
    let rest = ["abs/", "pdf/", "html/"]
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))?;
    let rest = rest.trim_end_matches('/');
    let rest = rest
        .strip_suffix(".pdf")
        .or_else(|| rest.strip_suffix(".PDF"))
        .unwrap_or(rest);
    normalize_arxiv_id(rest)
}

/// Canonicalize a bare ArXiv id, dropping any version suffix.
///
/// Accepts both the current `YYMM.NNNNN` scheme and the legacy
/// `archive[.SUB]/YYMMNNN` scheme.
pub fn normalize_arxiv_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(caps) = arxiv_new_style().captures(raw) {
        return Some(caps[1].to_string());
    }
    arxiv_old_style()
        .captures(raw)
        .map(|caps| caps[1].to_string())
}

/// Extract the canonical id from an ArXiv Atom `<id>` such as
/// `http://arxiv.org/abs/2303.08774v6`.
pub fn arxiv_id_from_atom_id(atom_id: &str) -> Option<String> {
    let (_, rest) = atom_id.split_once("/abs/")?;
    normalize_arxiv_id(rest.trim_end_matches('/'))
}

fn hal_id_from_path(path: &str) -> Option<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .find_map(normalize_hal_id)
}

/// Canonicalize a HAL document id (`hal-01234567v2` → `hal-01234567`).
pub fn normalize_hal_id(raw: &str) -> Option<String> {
    hal_id()
        .captures(raw.trim())
        .map(|caps| caps[1].to_ascii_lowercase())
}
