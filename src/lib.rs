//! # Paper Digest
//!
//! Article intake and summarization for the ArXiv and HAL open archives.
//!
//! Given an article URL, Paper Digest resolves it to a repository and
//! canonical id, fetches metadata and full text, splits the text into
//! token-bounded chunks, and produces a student-oriented summary plus key
//! concepts with a map-reduce pass over a language model. Results are kept
//! in a fingerprint cache keyed by article identity. A second operation
//! searches one or both repositories by keyword.
//!
//! ## Architecture
//!
//! ```text
//!  url ─► ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌────────────┐
//!         │ resolve  │──▶│  fetch   │──▶│  chunk  │──▶│ summarize  │
//!         └──────────┘   │ arxiv/hal│   └─────────┘   │ map+reduce │
//!              │         └──────────┘                 └─────┬──────┘
//!              ▼                                            ▼
//!         ┌──────────────────────────────────────────────────────┐
//!         │              fingerprint cache (LRU)                 │
//!         └──────────────────────────────────────────────────────┘
//!
//!  query ─► search ─► arxiv ┐
//!                  └► hal   ┴─► interleave
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pdigest summarize https://arxiv.org/abs/1706.03762
//! pdigest search "graph neural networks" --source both
//! pdigest serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed failures of the public operations |
//! | [`resolve`] | URL → repository + canonical id |
//! | [`retry`] | Bounded exponential backoff |
//! | [`traits`] | `Connector` and `LanguageModel` extension points |
//! | [`connector_arxiv`] | ArXiv Atom API connector |
//! | [`connector_hal`] | HAL Solr API connector |
//! | [`extract`] | PDF text extraction |
//! | [`fetch`] | Article fetcher with retry and abstract-only fallback |
//! | [`chunk`] | Token-bounded chunking |
//! | [`cache`] | Fingerprint cache |
//! | [`llm`] | Chat-completion clients |
//! | [`summarize`] | Map-reduce summarization |
//! | [`embedding`] | Embedding providers for similarity lookup |
//! | [`search`] | Multi-source search aggregation |
//! | [`service`] | `summarize` and `search` operations |
//! | [`server`] | HTTP API |

pub mod cache;
pub mod chunk;
pub mod config;
pub mod connector_arxiv;
pub mod connector_hal;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod llm;
pub mod models;
pub mod resolve;
pub mod retry;
pub mod search;
pub mod server;
pub mod service;
pub mod summarize;
pub mod traits;
