//! Boundary-aware text chunker.
//!
//! Splits article text into [`Chunk`]s that respect the configured
//! `max_tokens` limit. Breaks prefer paragraph boundaries, then sentence
//! ends, then word gaps; a single word longer than a whole chunk is split
//! between characters as a last resort.
//!
//! Consecutive chunks share roughly `overlap_tokens` of context: each chunk
//! after the first starts with the tail of its predecessor. The shared
//! prefix is recorded in [`Chunk::overlap_len`] so [`reassemble`] can drop
//! it and rebuild the normalized input exactly.
//!
//! Chunking is a pure function of `(text, max_tokens, overlap_tokens)`;
//! every chunk's text is a contiguous slice of the normalized input.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Boundary, Chunk};

/// Approximate chars-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Token estimate used for every budget decision.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Collapse intra-paragraph whitespace to single spaces and separate
/// paragraphs (blank-line delimited) with exactly `\n\n`.
pub fn normalize_whitespace(text: &str) -> String {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        current.extend(line.split_whitespace());
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs.join("\n\n")
}

/// Split text into chunks. Returns at least one chunk, with contiguous
/// indices starting at 0.
pub fn chunk_text(article_id: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let normalized = normalize_whitespace(text);
    let max_chars = config.max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = config.overlap_tokens * CHARS_PER_TOKEN;

    if normalized.is_empty() {
        return vec![make_chunk(article_id, 0, "", 0, Boundary::Start)];
    }

    // Leave room for the overlap prefix and its separator.
    let budget = if overlap_chars == 0 {
        max_chars
    } else {
        max_chars.saturating_sub(overlap_chars + 2).max(1)
    };

    let mut packer = Packer::new(article_id, budget, overlap_chars);
    for (p, paragraph) in normalized.split("\n\n").enumerate() {
        let boundary = if p == 0 {
            Boundary::Start
        } else {
            Boundary::Paragraph
        };
        packer.push_paragraph(paragraph, boundary);
    }
    packer.finish()
}

/// Rebuild the normalized text from a complete, ordered chunk list.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.push_str(chunk.boundary.separator());
        out.push_str(chunk.own_text());
    }
    out
}

struct Packer<'a> {
    article_id: &'a str,
    budget: usize,
    overlap_chars: usize,
    chunks: Vec<Chunk>,
    body: String,
    body_chars: usize,
    boundary: Boundary,
}

impl<'a> Packer<'a> {
    fn new(article_id: &'a str, budget: usize, overlap_chars: usize) -> Self {
        Self {
            article_id,
            budget,
            overlap_chars,
            chunks: Vec::new(),
            body: String::new(),
            body_chars: 0,
            boundary: Boundary::Start,
        }
    }

    fn push_paragraph(&mut self, paragraph: &str, boundary: Boundary) {
        if paragraph.chars().count() <= self.budget {
            self.push(paragraph, boundary);
            return;
        }
        for (s, sentence) in sentences(paragraph).into_iter().enumerate() {
            let boundary = if s == 0 { boundary } else { Boundary::Space };
            self.push_sentence(&sentence, boundary);
        }
    }

    fn push_sentence(&mut self, sentence: &str, boundary: Boundary) {
        if sentence.chars().count() <= self.budget {
            self.push(sentence, boundary);
            return;
        }
        for (w, word) in sentence.split(' ').enumerate() {
            let boundary = if w == 0 { boundary } else { Boundary::Space };
            self.push_word(word, boundary);
        }
    }

    fn push_word(&mut self, word: &str, boundary: Boundary) {
        if word.chars().count() <= self.budget {
            self.push(word, boundary);
            return;
        }
        let chars: Vec<char> = word.chars().collect();
        for (i, piece) in chars.chunks(self.budget).enumerate() {
            let piece: String = piece.iter().collect();
            let boundary = if i == 0 { boundary } else { Boundary::Split };
            self.push(&piece, boundary);
        }
    }

    /// Append a segment that fits within the budget on its own.
    fn push(&mut self, segment: &str, boundary: Boundary) {
        let len = segment.chars().count();
        if self.body.is_empty() {
            self.start(segment, len, boundary);
            return;
        }
        let sep = boundary.separator();
        if self.body_chars + sep.len() + len <= self.budget {
            self.body.push_str(sep);
            self.body.push_str(segment);
            self.body_chars += sep.len() + len;
        } else {
            self.flush();
            self.start(segment, len, boundary);
        }
    }

    fn start(&mut self, segment: &str, len: usize, boundary: Boundary) {
        self.body.push_str(segment);
        self.body_chars = len;
        self.boundary = boundary;
    }

    fn flush(&mut self) {
        if self.body.is_empty() {
            return;
        }
        let index = self.chunks.len();
        let prefix = match self.chunks.last() {
            Some(prev) if self.overlap_chars > 0 => {
                overlap_tail(prev.own_text(), self.overlap_chars).to_string()
            }
            _ => String::new(),
        };

        let (text, overlap_len) = if prefix.is_empty() {
            (std::mem::take(&mut self.body), 0)
        } else {
            let sep = self.boundary.separator();
            let overlap_len = prefix.len() + sep.len();
            (format!("{}{}{}", prefix, sep, self.body), overlap_len)
        };
        self.body.clear();
        self.body_chars = 0;

        self.chunks.push(make_chunk(
            self.article_id,
            index,
            &text,
            overlap_len,
            self.boundary,
        ));
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

/// Split a whitespace-normalized paragraph after sentence-ending words.
fn sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for word in paragraph.split(' ') {
        current.push(word);
        if ends_sentence(word) {
            out.push(current.join(" "));
            current.clear();
        }
    }
    if !current.is_empty() {
        out.push(current.join(" "));
    }
    out
}

fn ends_sentence(word: &str) -> bool {
    word.trim_end_matches(['"', '\'', ')', ']'])
        .ends_with(['.', '!', '?'])
}

/// Last `max_chars` characters of `text`, advanced to a word start when
/// the cut lands mid-word.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(total - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &text[start..];
    match tail.find([' ', '\n']) {
        Some(pos) if !tail[pos..].trim().is_empty() => tail[pos..].trim_start(),
        _ => tail,
    }
}

fn make_chunk(
    article_id: &str,
    index: usize,
    text: &str,
    overlap_len: usize,
    boundary: Boundary,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        article_id: article_id.to_string(),
        sequence_index: index,
        text: text.to_string(),
        token_count: estimate_tokens(text),
        overlap_len,
        boundary,
        hash,
    }
}
