//! End-to-end tests of `summarize` and `search` through the public API,
//! driven by in-process repositories and a scripted language model.

mod common;

use common::*;
use paper_digest::error::DigestError;
use paper_digest::models::{Limitation, Source, SourceSelector};
use paper_digest::resolve::resolve_url;
use std::sync::atomic::Ordering;

fn arxiv_with_paper() -> InMemoryRepository {
    InMemoryRepository::new(Source::Arxiv).with_article(
        "2303.08774",
        "GPT-4 Technical Report",
        Some(&long_text()),
    )
}

// ─── summarize ──────────────────────────────────────────────────────

#[tokio::test]
async fn summarize_arxiv_article() {
    let h = harness(arxiv_with_paper(), InMemoryRepository::new(Source::Hal));

    let key = resolve_url("https://arxiv.org/abs/2303.08774").unwrap();
    assert_eq!((key.source, key.id.as_str()), (Source::Arxiv, "2303.08774"));

    let response = h
        .digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap();
    assert!(!response.summary.is_empty());
    assert!(!response.cached);
    assert_eq!(response.article.id, "2303.08774");
    assert_eq!(response.article.url, "https://arxiv.org/abs/2303.08774");
    assert!(response.limitations.is_empty());

    // Deduplicated case-insensitively, then bounded to llm.max_key_concepts.
    assert_eq!(
        response.key_concepts,
        vec![
            "Transformer",
            "Self-attention",
            "Multi-head attention",
            "Positional encoding",
            "BLEU"
        ]
    );
    assert!(h.model.map_calls.load(Ordering::SeqCst) > 1);
    assert_eq!(h.model.reduce_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cached_summary_skips_fetch() {
    let h = harness(arxiv_with_paper(), InMemoryRepository::new(Source::Hal));

    let first = h
        .digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap();
    let map_calls = h.model.map_calls.load(Ordering::SeqCst);

    // A different URL form for the same paper.
    let second = h
        .digest
        .summarize("https://arxiv.org/pdf/2303.08774v2.pdf")
        .await
        .unwrap();

    assert!(second.cached);
    assert_eq!(second.summary, first.summary);
    assert_eq!(second.key_concepts, first.key_concepts);
    assert_eq!(h.arxiv.metadata_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.arxiv.full_text_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.map_calls.load(Ordering::SeqCst), map_calls);
    assert_eq!(h.digest.cache().len(), 1);
}

#[tokio::test]
async fn unsupported_url_is_a_typed_error() {
    let h = harness(arxiv_with_paper(), InMemoryRepository::new(Source::Hal));

    let err = h
        .digest
        .summarize("https://example.com/paper")
        .await
        .unwrap_err();
    match err {
        DigestError::UnsupportedSource { url } => assert_eq!(url, "https://example.com/paper"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(h.arxiv.metadata_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_full_text_degrades_to_abstract() {
    let hal = InMemoryRepository::new(Source::Hal).with_article(
        "hal-04093431",
        "Graph neural networks for chemistry",
        None,
    );
    let h = harness(InMemoryRepository::new(Source::Arxiv), hal);

    let response = h
        .digest
        .summarize("https://hal.science/hal-04093431v2")
        .await
        .unwrap();
    assert_eq!(response.article.source, Source::Hal);
    assert_eq!(response.limitations, vec![Limitation::AbstractOnly]);
    // Title + abstract fit in one chunk, so the map step is skipped.
    assert_eq!(h.model.map_calls.load(Ordering::SeqCst), 0);
    assert!(!response.summary.is_empty());
}

#[tokio::test]
async fn transient_fetch_failures_are_retried() {
    let arxiv = arxiv_with_paper();
    arxiv.metadata_failures.store(2, Ordering::SeqCst);
    let h = harness(arxiv, InMemoryRepository::new(Source::Hal));

    h.digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap();
    assert_eq!(h.arxiv.metadata_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_fetch_reports_attempts() {
    let arxiv = arxiv_with_paper();
    arxiv.metadata_failures.store(10, Ordering::SeqCst);
    let h = harness(arxiv, InMemoryRepository::new(Source::Hal));

    match h.digest.summarize("https://arxiv.org/abs/2303.08774").await {
        Err(DigestError::FetchFailed { key, attempts, .. }) => {
            assert_eq!(key.id, "2303.08774");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(h.digest.cache().is_empty());
}

#[tokio::test]
async fn unknown_article_is_fetch_failed_without_retries() {
    let h = harness(arxiv_with_paper(), InMemoryRepository::new(Source::Hal));

    match h.digest.summarize("https://arxiv.org/abs/2101.00001").await {
        Err(DigestError::FetchFailed { attempts, .. }) => assert_eq!(attempts, 1),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn llm_outage_keeps_partials_for_the_next_call() {
    let h = harness(arxiv_with_paper(), InMemoryRepository::new(Source::Hal));
    h.model.fail_reduce.store(true, Ordering::SeqCst);

    let err = h
        .digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "llm_unavailable");
    let map_calls = h.model.map_calls.load(Ordering::SeqCst);
    assert!(map_calls > 1);

    h.model.fail_reduce.store(false, Ordering::SeqCst);
    let response = h
        .digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap();

    assert!(!response.cached);
    assert!(!response.summary.is_empty());
    // Neither the article nor the chunk summaries were produced twice.
    assert_eq!(h.arxiv.metadata_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.map_calls.load(Ordering::SeqCst), map_calls);
}

#[tokio::test]
async fn forgotten_article_is_summarized_again() {
    let h = harness(arxiv_with_paper(), InMemoryRepository::new(Source::Hal));
    h.digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap();

    assert!(h.digest.forget("https://arxiv.org/pdf/2303.08774v1").unwrap());
    assert!(!h.digest.forget("https://arxiv.org/abs/2303.08774").unwrap());
    assert!(h.digest.cache().is_empty());

    let again = h
        .digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap();
    assert!(!again.cached);
    assert_eq!(h.arxiv.metadata_calls.load(Ordering::SeqCst), 2);
}

// ─── search ─────────────────────────────────────────────────────────

#[tokio::test]
async fn search_arxiv_is_bounded_and_well_formed() {
    let h = harness(
        InMemoryRepository::new(Source::Arxiv),
        InMemoryRepository::new(Source::Hal),
    );

    let response = h
        .digest
        .search("machine learning", SourceSelector::Arxiv, 10)
        .await
        .unwrap();
    assert_eq!(response.results.len(), 10);
    for result in &response.results {
        assert_eq!(result.source, Source::Arxiv);
        assert!(!result.title.is_empty());
        assert!(!result.url.is_empty());
        let key = resolve_url(&result.url).unwrap();
        assert_eq!(key.id, result.id);
    }
}

#[tokio::test]
async fn search_survives_one_slow_source() {
    let h = harness(
        InMemoryRepository::new(Source::Arxiv).with_search(SearchBehavior::Hits(4)),
        InMemoryRepository::new(Source::Hal).with_search(SearchBehavior::Hang),
    );

    let response = h
        .digest
        .search("graphs", SourceSelector::Both, 10)
        .await
        .unwrap();
    assert_eq!(response.results.len(), 4);
    assert!(response.results.iter().all(|r| r.source == Source::Arxiv));
    assert!(matches!(
        response.limitations.as_slice(),
        [Limitation::SourceOmitted { source: Source::Hal, .. }]
    ));
}

#[tokio::test]
async fn search_fails_when_every_source_fails() {
    let h = harness(
        InMemoryRepository::new(Source::Arxiv).with_search(SearchBehavior::Fail),
        InMemoryRepository::new(Source::Hal).with_search(SearchBehavior::Fail),
    );

    let err = h
        .digest
        .search("graphs", SourceSelector::Both, 10)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "search_unavailable");
}

#[tokio::test]
async fn search_with_no_hits_is_empty_success() {
    let h = harness(
        InMemoryRepository::new(Source::Arxiv),
        InMemoryRepository::new(Source::Hal).with_search(SearchBehavior::Hits(0)),
    );

    let response = h
        .digest
        .search("zzzz", SourceSelector::Hal, 10)
        .await
        .unwrap();
    assert!(response.results.is_empty());
    assert!(response.limitations.is_empty());
}

// ─── related ────────────────────────────────────────────────────────

struct ConstantEmbedder;

#[async_trait::async_trait]
impl paper_digest::embedding::EmbeddingProvider for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.5, 0.25]).collect())
    }
}

#[tokio::test]
async fn related_lists_other_cached_articles() {
    let arxiv = arxiv_with_paper().with_article("1706.03762", "Attention Is All You Need", None);
    let mut h = harness(arxiv, InMemoryRepository::new(Source::Hal));
    h.digest = h.digest.with_embedder(std::sync::Arc::new(ConstantEmbedder));

    h.digest
        .summarize("https://arxiv.org/abs/2303.08774")
        .await
        .unwrap();
    h.digest
        .summarize("https://arxiv.org/abs/1706.03762")
        .await
        .unwrap();

    let related = h
        .digest
        .related("https://arxiv.org/abs/2303.08774", 5)
        .await
        .unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0].article.id, "1706.03762");
    assert!((related[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn related_needs_embeddings() {
    let h = harness(arxiv_with_paper(), InMemoryRepository::new(Source::Hal));
    let err = h
        .digest
        .related("https://arxiv.org/abs/2303.08774", 5)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "bad_request");
}
