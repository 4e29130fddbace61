//! Fingerprint cache.
//!
//! Maps an article's identity ([`ArticleKey`]) to everything already
//! computed for it: the fetched article, its chunks, per-chunk intermediate
//! summaries, the live [`SummaryRecord`] and (when embeddings are enabled)
//! the summary vector.
//!
//! # Semantics
//!
//! - One entry per key; [`FingerprintCache::store`] is an upsert, so an
//!   article never has two live summaries.
//! - Entries are immutable once stored and handed out as `Arc`s. A reader
//!   keeps a consistent snapshot even if a writer replaces the entry
//!   concurrently.
//! - Least-recently-used eviction under a count or byte-size budget. A
//!   lookup counts as a use. The entry being stored is never evicted by its
//!   own insertion, even if it alone exceeds the size budget.
//! - All operations take a single short mutex; none hold it across I/O.
//!
//! # Persistence
//!
//! With `cache.snapshot_path` set, [`FingerprintCache::open`] restores a
//! JSON snapshot and [`FingerprintCache::shutdown`] writes one (oldest
//! first, so recency order survives a restart). A corrupt snapshot is
//! logged and ignored.

use anyhow::{Context, Result};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::CacheConfig;
use crate::embedding::cosine_similarity;
use crate::models::{Article, ArticleKey, Chunk, Limitation, SummaryRecord};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Keep at most this many entries.
    Count { max_entries: usize },
    /// Keep the summed [`CacheEntry::size_bytes`] at or under this budget.
    Size { max_bytes: usize },
}

/// Everything computed for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub article: Article,
    pub chunks: Vec<Chunk>,
    /// Intermediate summary per chunk, `None` where the map call failed.
    #[serde(default)]
    pub partials: Vec<Option<String>>,
    #[serde(default)]
    pub summary: Option<SummaryRecord>,
    /// Degradations recorded when the summary was produced.
    #[serde(default)]
    pub limitations: Vec<Limitation>,
    #[serde(default)]
    pub summary_vector: Option<Vec<f32>>,
}

impl CacheEntry {
    pub fn new(article: Article, chunks: Vec<Chunk>) -> Self {
        Self {
            article,
            chunks,
            partials: Vec::new(),
            summary: None,
            limitations: Vec::new(),
            summary_vector: None,
        }
    }

    /// Approximate heap footprint: text payloads plus vectors.
    pub fn size_bytes(&self) -> usize {
        let article = self.article.title.len()
            + self.article.authors.iter().map(String::len).sum::<usize>()
            + self.article.abstract_text.as_ref().map_or(0, String::len)
            + self.article.full_text.as_ref().map_or(0, String::len);
        let chunks: usize = self
            .chunks
            .iter()
            .map(|c| c.text.len() + c.hash.len())
            .sum();
        let partials: usize = self.partials.iter().flatten().map(String::len).sum();
        let summary = self.summary.as_ref().map_or(0, |s| {
            s.summary_text.len() + s.key_concepts.iter().map(String::len).sum::<usize>()
        });
        let vector = self
            .summary_vector
            .as_ref()
            .map_or(0, |v| v.len() * std::mem::size_of::<f32>());
        article + chunks + partials + summary + vector
    }
}

/// A cached article ranked by summary similarity.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub key: ArticleKey,
    pub score: f32,
    pub entry: Arc<CacheEntry>,
}

struct CacheState {
    entries: LruCache<ArticleKey, Arc<CacheEntry>>,
    total_bytes: usize,
}

pub struct FingerprintCache {
    state: Mutex<CacheState>,
    policy: EvictionPolicy,
    snapshot_path: Option<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    key: ArticleKey,
    entry: CacheEntry,
}

impl FingerprintCache {
    /// An empty cache with no persistence.
    pub fn in_memory(policy: EvictionPolicy) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
            policy,
            snapshot_path: None,
        }
    }

    /// Build the cache from config, restoring the snapshot if one exists.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let mut cache = Self::in_memory(config.eviction_policy()?);
        cache.snapshot_path = config.snapshot_path.clone();

        if let Some(path) = cache.snapshot_path.clone() {
            if path.exists() {
                match read_snapshot(&path) {
                    Ok(snapshot) => {
                        let count = snapshot.entries.len();
                        for item in snapshot.entries {
                            cache.store(item.key, item.entry);
                        }
                        tracing::info!(
                            path = %path.display(),
                            restored = count,
                            kept = cache.len(),
                            "restored cache snapshot"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %format!("{:#}", e),
                            "ignoring unreadable cache snapshot"
                        );
                    }
                }
            }
        }

        Ok(cache)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Point lookup by identity. Marks the entry as recently used.
    pub fn lookup(&self, key: &ArticleKey) -> Option<Arc<CacheEntry>> {
        let mut state = self.lock();
        let hit = state.entries.get(key).cloned();
        tracing::debug!(article = %key, hit = hit.is_some(), "cache lookup");
        hit
    }

    /// Insert or replace the entry for `key`, then evict down to budget.
    pub fn store(&self, key: ArticleKey, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        let size = entry.size_bytes();

        let mut state = self.lock();
        if let Some(old) = state.entries.put(key.clone(), entry.clone()) {
            state.total_bytes = state.total_bytes.saturating_sub(old.size_bytes());
        }
        state.total_bytes += size;

        while state.entries.len() > 1 && self.over_budget(&state) {
            match state.entries.pop_lru() {
                Some((evicted_key, evicted)) => {
                    state.total_bytes = state.total_bytes.saturating_sub(evicted.size_bytes());
                    tracing::info!(article = %evicted_key, "evicted from cache");
                }
                None => break,
            }
        }

        entry
    }

    fn over_budget(&self, state: &CacheState) -> bool {
        match self.policy {
            EvictionPolicy::Count { max_entries } => state.entries.len() > max_entries,
            EvictionPolicy::Size { max_bytes } => state.total_bytes > max_bytes,
        }
    }

    /// Drop one entry; the next `summarize` for it starts from scratch.
    pub fn remove(&self, key: &ArticleKey) -> Option<Arc<CacheEntry>> {
        let mut state = self.lock();
        let removed = state.entries.pop(key);
        if let Some(entry) = &removed {
            state.total_bytes = state.total_bytes.saturating_sub(entry.size_bytes());
        }
        removed
    }

    pub fn contains(&self, key: &ArticleKey) -> bool {
        self.lock().entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        self.lock().total_bytes
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.total_bytes = 0;
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<ArticleKey> {
        self.lock().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    /// Top-`k` cached summaries by cosine similarity to `vector`.
    ///
    /// Entries without a summary vector are skipped. Does not affect
    /// recency.
    pub fn nearest(&self, vector: &[f32], k: usize) -> Vec<Neighbor> {
        let candidates: Vec<(ArticleKey, Arc<CacheEntry>)> = self
            .lock()
            .entries
            .iter()
            .filter(|(_, e)| e.summary_vector.is_some())
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect();

        let mut scored: Vec<Neighbor> = candidates
            .into_iter()
            .filter_map(|(key, entry)| {
                let score = cosine_similarity(vector, entry.summary_vector.as_deref()?);
                Some(Neighbor { key, score, entry })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.id.cmp(&b.key.id))
        });
        scored.truncate(k);
        scored
    }

    /// Write the snapshot if persistence is configured.
    pub fn shutdown(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let entries: Vec<SnapshotEntry> = {
            let state = self.lock();
            // iter() runs most-recent first; the snapshot is oldest first.
            state
                .entries
                .iter()
                .rev()
                .map(|(key, entry)| SnapshotEntry {
                    key: key.clone(),
                    entry: entry.as_ref().clone(),
                })
                .collect()
        };
        let count = entries.len();
        write_snapshot(
            path,
            &Snapshot {
                version: SNAPSHOT_VERSION,
                entries,
            },
        )?;
        tracing::info!(path = %path.display(), entries = count, "wrote cache snapshot");
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read cache snapshot: {}", path.display()))?;
    let snapshot: Snapshot =
        serde_json::from_slice(&bytes).context("Failed to parse cache snapshot")?;
    if snapshot.version != SNAPSHOT_VERSION {
        anyhow::bail!(
            "unsupported cache snapshot version {} (expected {})",
            snapshot.version,
            SNAPSHOT_VERSION
        );
    }
    Ok(snapshot)
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec(snapshot)?;
    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write cache snapshot: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move cache snapshot into {}", path.display()))?;
    Ok(())
}
