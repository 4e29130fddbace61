//! # Paper Digest CLI (`pdigest`)
//!
//! Summarize ArXiv and HAL articles and search both repositories from the
//! command line, or serve the same operations over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! pdigest --config ./config/digest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdigest resolve <url>` | Print the repository and canonical id behind a URL |
//! | `pdigest summarize <url>` | Fetch, chunk and summarize an article |
//! | `pdigest search "<query>"` | Keyword search in arxiv, hal, or both |
//! | `pdigest related <url>` | Cached articles with similar summaries (needs embeddings) |
//! | `pdigest cache list\|forget <url>\|clear` | Inspect or prune the persisted cache |
//! | `pdigest serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! export GROQ_API_KEY=...
//! pdigest summarize https://arxiv.org/abs/1706.03762
//! pdigest search "graph neural networks" --source both --max-results 5
//! pdigest summarize https://hal.science/hal-04093431 --json | jq .key_concepts
//! RUST_LOG=paper_digest=debug pdigest serve
//! ```
//!
//! Logs go to stderr; results go to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use paper_digest::config::{self, Config};
use paper_digest::models::{format_authors, Limitation, SourceSelector};
use paper_digest::resolve::resolve_url;
use paper_digest::server;
use paper_digest::service::Digest;

const DEFAULT_CONFIG: &str = "./config/digest.toml";

/// Paper Digest: map-reduce LLM summaries of ArXiv and HAL articles.
#[derive(Parser)]
#[command(name = "pdigest", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/digest.toml`; built-in defaults are used when
    /// that file does not exist. See `config/digest.example.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve an article URL to its repository and canonical id.
    ///
    /// Makes no network calls.
    Resolve { url: String },

    /// Summarize the article behind a URL.
    ///
    /// Repeated calls for the same article are served from the cache
    /// (persisted between runs when `cache.snapshot_path` is set).
    Summarize {
        url: String,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search one or both repositories.
    Search {
        query: String,

        /// `arxiv`, `hal`, or `both`.
        #[arg(long, default_value = "arxiv")]
        source: SourceSelector,

        #[arg(long, default_value_t = 10)]
        max_results: usize,

        /// Print the response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List cached articles whose summaries are closest to this one's.
    Related {
        url: String,

        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },

    /// Inspect or prune the cache snapshot.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached articles, most recently used first.
    List,
    /// Drop one article so its next summary is recomputed.
    Forget { url: String },
    /// Drop every cached article.
    Clear,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let path = Path::new(DEFAULT_CONFIG);
            if path.exists() {
                config::load_config(path)
            } else {
                tracing::debug!("no config at {}, using defaults", DEFAULT_CONFIG);
                let cfg = Config::default();
                config::validate(&cfg)?;
                Ok(cfg)
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Resolve { url } = &cli.command {
        let key = resolve_url(url)?;
        println!("{}\t{}\t{}", key.source, key.id, key.canonical_url());
        return Ok(());
    }

    let cfg = load(cli.config.as_deref())?;
    let digest = Arc::new(Digest::from_config(cfg)?);

    let outcome = run(&digest, cli.command).await;
    if let Err(e) = digest.shutdown() {
        tracing::warn!(error = %format!("{:#}", e), "failed to write cache snapshot");
    }
    outcome
}

async fn run(digest: &Arc<Digest>, command: Commands) -> Result<()> {
    match command {
        Commands::Resolve { .. } => {
            // Handled above (before config loading)
        }
        Commands::Summarize { url, json } => {
            let response = digest.summarize(&url).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            let article = &response.article;
            println!("{}", article.title);
            println!(
                "{} · {}:{}{}",
                format_authors(&article.authors),
                article.source,
                article.id,
                if response.cached { " (cached)" } else { "" }
            );
            println!("{}\n", article.url);
            println!("{}\n", response.summary);
            if !response.key_concepts.is_empty() {
                println!("Key concepts:");
                for concept in &response.key_concepts {
                    println!("  - {}", concept);
                }
            }
            print_limitations(&response.limitations);
        }
        Commands::Search {
            query,
            source,
            max_results,
            json,
        } => {
            let response = digest.search(&query, source, max_results).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            if response.results.is_empty() {
                println!("No results.");
            }
            for (i, result) in response.results.iter().enumerate() {
                println!("{}. {}", i + 1, result.title);
                println!(
                    "   {} · {}{}",
                    format_authors(&result.authors),
                    result.source,
                    result
                        .published
                        .as_deref()
                        .map(|d| format!(" · {}", d))
                        .unwrap_or_default()
                );
                println!("   {}", result.url);
            }
            print_limitations(&response.limitations);
        }
        Commands::Related { url, k } => {
            let related = digest.related(&url, k).await?;
            if related.is_empty() {
                println!("No related articles in the cache.");
            }
            for item in related {
                println!(
                    "{:.3}  {}  {}",
                    item.score, item.article.title, item.article.url
                );
            }
        }
        Commands::Cache { action } => {
            if digest.config().cache.snapshot_path.is_none() {
                tracing::warn!("cache.snapshot_path is unset; nothing persists past this run");
            }
            let cache = digest.cache();
            match action {
                CacheAction::List => {
                    for key in cache.keys() {
                        println!("{}\t{}\t{}", key.source, key.id, key.canonical_url());
                    }
                    println!("{} article(s), {} bytes", cache.len(), cache.total_bytes());
                }
                CacheAction::Forget { url } => {
                    if !digest.forget(&url)? {
                        println!("Not cached.");
                    }
                }
                CacheAction::Clear => {
                    let count = cache.len();
                    cache.clear();
                    println!("Removed {} article(s).", count);
                }
            }
        }
        Commands::Serve => {
            server::run_server(digest.clone()).await?;
        }
    }
    Ok(())
}

fn print_limitations(limitations: &[Limitation]) {
    if limitations.is_empty() {
        return;
    }
    println!("\nNotes:");
    for limitation in limitations {
        let note = match limitation {
            Limitation::AbstractOnly => {
                "full text unavailable; summary is based on the title and abstract".to_string()
            }
            Limitation::PartialSections { failed, total } => {
                format!("{} of {} sections could not be summarized", failed, total)
            }
            Limitation::MalformedModelOutput { detail } => {
                format!("model output was not in the expected format ({})", detail)
            }
            Limitation::SourceOmitted { source, reason } => {
                format!("{} omitted: {}", source, reason)
            }
        };
        println!("  ! {}", note);
    }
}
