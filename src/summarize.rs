//! Map-reduce summarization.
//!
//! ```text
//!   chunk 0 ─┐                      ┌─ partial 0 ─┐
//!   chunk 1 ─┼─► map (≤ N at once) ─┼─ partial 1 ─┼─► reduce ─► FINAL SUMMARY
//!   chunk 2 ─┘                      └─ (failed)  ─┘             KEY CONCEPTS
//! ```
//!
//! The map step summarizes every chunk independently with at most
//! `llm.map_concurrency` calls in flight. It is a barrier: reduce starts
//! only after every map call has succeeded or failed, and failures are
//! carried as values in the joined result. Partials already known from an
//! earlier run are reused. A single-chunk article skips the map step.
//!
//! The reduce prompt asks for a fixed output format. If the model ignores
//! it, one retry is made with a stricter prompt; after that the raw text is
//! used as the summary and a [`Limitation::MalformedModelOutput`] is
//! recorded.

use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::LlmConfig;
use crate::error::DigestError;
use crate::llm::complete_with_retry;
use crate::models::{Chunk, Limitation};
use crate::retry::RetryPolicy;
use crate::traits::LanguageModel;

const MAP_PROMPT: &str = "Based only on the following excerpt from a scientific article, \
write a very concise summary of the key information it presents.\n\n\
\"\"\"\n{text}\n\"\"\"\n\nCONCISE SUMMARY:";

const REDUCE_PROMPT: &str = "Your task is to write a summary of a scientific article for a \
student audience, using the source material below.\n\
Write approximately 5 short paragraphs that clearly cover:\n\
1. The main research question or problem addressed.\n\
2. The core methodology or approach.\n\
3. The key findings and results.\n\
4. The significance or contribution to the field.\n\
5. Implications, applications or future directions.\n\n\
Then list the {min_concepts}-{max_concepts} most essential key concepts or technical terms \
needed to understand the research, most important first.\n\n\
Source material:\n\"\"\"\n{text}\n\"\"\"\n\n\
Provide your output in the following format EXACTLY:\n\
FINAL SUMMARY:\n[summary paragraphs]\n\n\
KEY CONCEPTS:\n- Concept 1\n- Concept 2\n- ...";

const STRICT_SUFFIX: &str = "\n\nIMPORTANT: your previous answer did not follow the required \
format. Begin your answer with the line `FINAL SUMMARY:` and end it with a line \
`KEY CONCEPTS:` followed by one concept per line, each starting with `- `. \
Do not add any other headings or commentary.";

fn sections_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)FINAL\s+SUMMARY\s*:\**(.*?)\**\s*KEY\s+CONCEPTS\s*:\**(.*)$")
            .expect("valid regex")
    })
}

fn concepts_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)KEY\s+CONCEPTS\s*:").expect("valid regex"))
}

fn summary_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^\W*FINAL\s+SUMMARY\s*:\**").expect("valid regex"))
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:[-*•]|\d+[.)])\s*(.+?)\s*$").expect("valid regex"))
}

/// Result of the map step.
#[derive(Debug, Clone)]
pub struct MapOutcome {
    /// One slot per chunk, `None` where summarization failed.
    pub partials: Vec<Option<String>>,
    pub limitations: Vec<Limitation>,
}

/// Result of the reduce step.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceOutcome {
    pub summary: String,
    /// Salience order, case-insensitively unique, at most `max_key_concepts`.
    pub key_concepts: Vec<String>,
    pub limitations: Vec<Limitation>,
}

/// Structured reduce output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub summary: String,
    pub key_concepts: Vec<String>,
}

pub struct Summarizer {
    model: Arc<dyn LanguageModel>,
    policy: RetryPolicy,
    concurrency: usize,
    max_key_concepts: usize,
}

impl Summarizer {
    pub fn new(model: Arc<dyn LanguageModel>, config: &LlmConfig) -> Self {
        Self {
            model,
            policy: config.retry_policy(),
            concurrency: config.map_concurrency.max(1),
            max_key_concepts: config.max_key_concepts.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Summarize every chunk that has no usable entry in `existing`.
    ///
    /// `existing` is ignored unless it has one slot per chunk.
    ///
    /// # Errors
    ///
    /// [`DigestError::LlmUnavailable`] when no chunk could be summarized.
    pub async fn map(
        &self,
        chunks: &[Chunk],
        existing: &[Option<String>],
    ) -> Result<MapOutcome, DigestError> {
        let total = chunks.len();
        let mut partials: Vec<Option<String>> = if existing.len() == total {
            existing.to_vec()
        } else {
            vec![None; total]
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut set = JoinSet::new();
        let mut reused = 0usize;

        for (index, chunk) in chunks.iter().enumerate() {
            if partials[index].is_some() {
                reused += 1;
                continue;
            }
            let model = self.model.clone();
            let policy = self.policy;
            let semaphore = semaphore.clone();
            let prompt = MAP_PROMPT.replace("{text}", &chunk.text);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let what = format!("summarize chunk {}", index);
                let result = complete_with_retry(model.as_ref(), &policy, &what, &prompt).await;
                (index, result)
            });
        }

        tracing::info!(
            chunks = total,
            reused,
            concurrency = self.concurrency,
            "map step started"
        );

        let mut last_error = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, Ok(text))) => partials[index] = Some(text.trim().to_string()),
                Ok((index, Err(e))) => {
                    tracing::warn!(chunk = index, error = %e, "chunk summary failed");
                    last_error = Some(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "chunk summary task aborted");
                }
            }
        }

        let failed = partials.iter().filter(|p| p.is_none()).count();
        if total > 0 && failed == total {
            return Err(last_error.unwrap_or_else(|| DigestError::LlmUnavailable {
                attempts: 0,
                cause: "no chunk could be summarized".to_string(),
            }));
        }

        let mut limitations = Vec::new();
        if failed > 0 {
            limitations.push(Limitation::PartialSections { failed, total });
        }
        Ok(MapOutcome {
            partials,
            limitations,
        })
    }

    /// Produce the document-level summary and key concepts from `material`
    /// (joined partials, or the text of a single chunk).
    ///
    /// # Errors
    ///
    /// [`DigestError::LlmUnavailable`] when the first reduce call cannot be
    /// completed. Format problems never fail the call.
    pub async fn reduce(&self, material: &str) -> Result<ReduceOutcome, DigestError> {
        let prompt = self.reduce_prompt(material);
        let model = self.model.as_ref();
        let first = complete_with_retry(model, &self.policy, "reduce", &prompt).await?;

        let first_error = match parse_output(&first) {
            Ok(parsed) => return Ok(self.finish(parsed, Vec::new())),
            Err(e) => e,
        };
        tracing::warn!(error = %first_error, "reduce output malformed, retrying strictly");

        let strict = format!("{}{}", prompt, STRICT_SUFFIX);
        let retried = complete_with_retry(model, &self.policy, "reduce (strict)", &strict).await;
        let raw = match retried {
            Ok(second) => match parse_output(&second) {
                Ok(parsed) => return Ok(self.finish(parsed, Vec::new())),
                Err(_) => second,
            },
            Err(e) => {
                tracing::warn!(error = %e, "strict reduce retry failed, keeping first output");
                first
            }
        };

        let detail = match first_error {
            DigestError::LlmOutputMalformed { detail } => detail,
            other => other.to_string(),
        };
        tracing::warn!(%detail, "using best-effort summary");
        let parsed = best_effort(&raw);
        Ok(self.finish(parsed, vec![Limitation::MalformedModelOutput { detail }]))
    }

    /// Map then reduce. A single chunk goes straight to reduce.
    ///
    /// `partials` holds the per-chunk state from an earlier run (or is
    /// empty) and is updated in place, also when reduce fails, so the
    /// caller can keep it for the next attempt. Map-step limitations are
    /// merged into the returned outcome.
    pub async fn summarize(
        &self,
        chunks: &[Chunk],
        partials: &mut Vec<Option<String>>,
    ) -> Result<ReduceOutcome, DigestError> {
        if chunks.len() <= 1 {
            let text = chunks.first().map(|c| c.text.as_str()).unwrap_or("");
            return self.reduce(text).await;
        }

        let map = self.map(chunks, partials).await?;
        *partials = map.partials;
        let mut reduced = self.reduce(&join_partials(partials)).await?;
        let mut limitations = map.limitations;
        limitations.append(&mut reduced.limitations);
        reduced.limitations = limitations;
        Ok(reduced)
    }

    fn reduce_prompt(&self, material: &str) -> String {
        REDUCE_PROMPT
            .replace("{min_concepts}", &self.max_key_concepts.min(5).to_string())
            .replace("{max_concepts}", &self.max_key_concepts.to_string())
            .replace("{text}", material)
    }

    fn finish(&self, parsed: ParsedOutput, limitations: Vec<Limitation>) -> ReduceOutcome {
        ReduceOutcome {
            summary: parsed.summary,
            key_concepts: dedupe_concepts(parsed.key_concepts, self.max_key_concepts),
            limitations,
        }
    }
}

/// Concatenate the successful partials in chunk order.
pub fn join_partials(partials: &[Option<String>]) -> String {
    partials
        .iter()
        .flatten()
        .map(|p| p.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Parse `FINAL SUMMARY: … KEY CONCEPTS: …` output (case-insensitive).
///
/// # Errors
///
/// [`DigestError::LlmOutputMalformed`] when a delimiter is missing, the
/// summary is empty, or no concept bullets follow `KEY CONCEPTS:`.
pub fn parse_output(raw: &str) -> Result<ParsedOutput, DigestError> {
    let malformed = |detail: &str| DigestError::LlmOutputMalformed {
        detail: detail.to_string(),
    };

    let caps = sections_re()
        .captures(raw)
        .ok_or_else(|| malformed("missing FINAL SUMMARY/KEY CONCEPTS delimiters"))?;
    let summary = caps[1].trim().to_string();
    if summary.is_empty() {
        return Err(malformed("empty summary section"));
    }
    let key_concepts = extract_bullets(&caps[2]);
    if key_concepts.is_empty() {
        return Err(malformed("no key concepts listed"));
    }
    Ok(ParsedOutput {
        summary,
        key_concepts,
    })
}

/// Whatever can be salvaged from output that failed [`parse_output`].
pub fn best_effort(raw: &str) -> ParsedOutput {
    let (summary_part, concepts_part) = match concepts_marker_re().find(raw) {
        Some(m) => (&raw[..m.start()], Some(&raw[m.end()..])),
        None => (raw, None),
    };
    let summary = summary_label_re().replace(summary_part.trim(), "").trim().to_string();
    let summary = if summary.is_empty() {
        raw.trim().to_string()
    } else {
        summary
    };
    ParsedOutput {
        summary,
        key_concepts: concepts_part.map(extract_bullets).unwrap_or_default(),
    }
}

fn extract_bullets(text: &str) -> Vec<String> {
    bullet_re()
        .captures_iter(text)
        .map(|c| c[1].trim_matches(|ch: char| ch == '*' || ch.is_whitespace()).to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Drop case-insensitive duplicates (first occurrence wins) and truncate.
pub fn dedupe_concepts(concepts: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    concepts
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.to_lowercase()))
        .take(max)
        .collect()
}
