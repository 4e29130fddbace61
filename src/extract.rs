//! Plain-text extraction for downloaded article files.
//!
//! Repositories hand us PDF bytes (ArXiv `/pdf/`, HAL `fileMain_s`); this
//! module turns them into UTF-8 text the chunker can work with. Extraction
//! never panics: a corrupt or image-only PDF is an error the fetcher turns
//! into an abstract-only article.

use thiserror::Error;

use crate::retry::CallError;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

/// Refuse to parse anything larger than this (bytes).
pub const MAX_PDF_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("document too large: {0} bytes")]
    TooLarge(usize),
}

/// Extracts plain text from a downloaded file and tidies it for chunking.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    let raw = match mime.as_str() {
        MIME_PDF | "application/x-pdf" => extract_pdf(bytes)?,
        MIME_TEXT => String::from_utf8_lossy(bytes).into_owned(),
        // Some mirrors serve PDFs as octet-stream; trust the magic bytes.
        _ if bytes.starts_with(b"%PDF") => extract_pdf(bytes)?,
        _ => return Err(ExtractError::UnsupportedContentType(content_type.to_string())),
    };
    Ok(clean_text(&raw))
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    if bytes.len() > MAX_PDF_BYTES {
        return Err(ExtractError::TooLarge(bytes.len()));
    }
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Normalize extracted text: unify line endings, re-join words hyphenated
/// across line breaks, drop control characters and squeeze runs of blank
/// lines down to a single paragraph break.
pub fn clean_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank = false;

    for line in unified.lines() {
        let line: String = line
            .chars()
            .filter(|c| !c.is_control() || *c == '\t')
            .collect();
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank = true;
            continue;
        }

        let mut piece = line;
        if !out.is_empty() {
            if blank {
                out.push_str("\n\n");
            } else if ends_with_word_hyphen(&out) && starts_lowercase(line) {
                out.pop();
                piece = line.trim_start();
            } else {
                out.push('\n');
            }
        }
        blank = false;
        out.push_str(piece);
    }

    out.trim().to_string()
}

fn ends_with_word_hyphen(text: &str) -> bool {
    let mut rev = text.chars().rev();
    rev.next() == Some('-') && rev.next().is_some_and(|c| c.is_alphabetic())
}

fn starts_lowercase(line: &str) -> bool {
    line.trim_start()
        .chars()
        .next()
        .is_some_and(|c| c.is_lowercase())
}

/// Collapse every whitespace run (including newlines) to a single space.
/// Atom titles and abstracts arrive hard-wrapped.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Download `url` and extract its text.
///
/// `Ok(None)` when the file does not exist (404/410) or holds no text.
/// Network errors and 429/5xx are transient; unreadable documents and
/// files over [`MAX_PDF_BYTES`] are permanent.
pub async fn download_text(
    client: &reqwest::Client,
    service: &str,
    url: &str,
) -> Result<Option<String>, CallError> {
    download_text_limited(client, service, url, MAX_PDF_BYTES).await
}

/// [`download_text`] with an explicit size limit. A declared
/// `Content-Length` over `max_bytes` is refused before the body is read;
/// an undeclared body is cut off as soon as it passes the limit.
pub async fn download_text_limited(
    client: &reqwest::Client,
    service: &str,
    url: &str,
    max_bytes: usize,
) -> Result<Option<String>, CallError> {
    let mut resp = client.get(url).send().await?;
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::GONE {
        return Ok(None);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(CallError::from_status(service, status, &body));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(MIME_PDF)
        .to_string();
    let too_large = |size: u64| {
        CallError::permanent(anyhow::anyhow!(
            "{}: {}",
            url,
            ExtractError::TooLarge(size as usize)
        ))
    };
    if let Some(declared) = resp.content_length() {
        if declared > max_bytes as u64 {
            return Err(too_large(declared));
        }
    }
    let mut bytes = Vec::new();
    while let Some(chunk) = resp.chunk().await? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(too_large((bytes.len() + chunk.len()) as u64));
        }
        bytes.extend_from_slice(&chunk);
    }

    // pdf-extract is CPU bound and synchronous.
    let text = tokio::task::spawn_blocking(move || extract_text(&bytes, &content_type))
        .await
        .map_err(|e| CallError::permanent(anyhow::anyhow!("extraction task failed: {}", e)))?
        .map_err(|e| CallError::permanent(anyhow::anyhow!("{}: {}", url, e)))?;

    if text.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves `body` at `/paper.pdf` on an ephemeral port.
    async fn serve_file(body: Vec<u8>) -> String {
        let app = axum::Router::new().route(
            "/paper.pdf",
            axum::routing::get(move || {
                let body = body.clone();
                async move { ([(axum::http::header::CONTENT_TYPE, MIME_TEXT)], body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/paper.pdf", addr)
    }

    #[tokio::test]
    async fn oversized_download_is_refused() {
        let url = serve_file(vec![b'a'; 4096]).await;
        let client = reqwest::Client::new();

        let err = download_text_limited(&client, "test", &url, 1024).await.unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("too large"));

        let text = download_text_limited(&client, "test", &url, 8192).await.unwrap();
        assert_eq!(text.map(|t| t.len()), Some(4096));
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn pdf_magic_bytes_are_sniffed() {
        let err = extract_text(b"%PDF-1.4 garbage", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn plain_text_passes_through_cleaned() {
        let raw = b"Line one\r\nline two\r\n\r\n\r\n\r\nNext";
        let text = extract_text(raw, "text/plain; charset=utf-8").unwrap();
        assert_eq!(text, "Line one\nline two\n\nNext");
    }

    #[test]
    fn collapse_whitespace_flattens_wrapped_titles() {
        assert_eq!(
            collapse_whitespace("  Attention Is\n      All You Need "),
            "Attention Is All You Need"
        );
    }

    #[test]
    fn hyphenated_line_breaks_are_joined() {
        assert_eq!(clean_text("a trans-\nformer model"), "a transformer model");
        // Real compounds before a capitalized word are kept as line breaks.
        assert_eq!(clean_text("Mixture-of-\nExperts"), "Mixture-of-\nExperts");
    }
}
