//! Disk-backed, content-addressed embedding cache.
//!
//! Embeddings are expensive (API latency and cost) while the knowledge base
//! is static between index rebuilds, so every generated vector is persisted
//! under a hash of the exact input text. Rebuilding the index after a
//! chunking tweak then only pays for the chunks that actually changed.

use crate::error::Result;
use crate::provider::EmbeddingProvider;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// On-disk cache entry. The stored text is a prefix kept for debugging; the
/// file name (content hash) is the authoritative key.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    text: String,
    embedding: Vec<f32>,
}

/// Hit/miss counters and on-disk entry count.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_rate: f64,
    pub entries: usize,
}

/// Content-addressed cache in front of an [`EmbeddingProvider`].
///
/// The read path is reentrant (`&self`, atomic counters). Entry writes are
/// idempotent: a given key always carries the same bytes, so a racing
/// duplicate write is harmless and no cross-process lock is taken.
pub struct EmbeddingCache {
    provider: Arc<dyn EmbeddingProvider>,
    cache_dir: PathBuf,
    retry: RetryPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    /// Open (creating if needed) a cache directory with the default retry
    /// policy.
    pub async fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        Self::with_retry(provider, cache_dir, RetryPolicy::default()).await
    }

    /// Open a cache with an explicit retry policy.
    pub async fn with_retry(
        provider: Arc<dyn EmbeddingProvider>,
        cache_dir: impl Into<PathBuf>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let cache_dir = cache_dir.into();
        tokio::fs::create_dir_all(&cache_dir).await?;
        Ok(Self {
            provider,
            cache_dir,
            retry,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Dimension of the vectors produced by the wrapped provider.
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    fn cache_key(text: &str) -> String {
        hex::encode(blake3::hash(text.as_bytes()).as_bytes())
    }

    fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{key}.json"))
    }

    async fn load_cached(&self, path: &Path) -> Option<Vec<f32>> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Some(entry.embedding),
            Err(err) => {
                tracing::warn!("ignoring unreadable cache entry {}: {err}", path.display());
                None
            }
        }
    }

    async fn store(&self, text: &str, key: &str, embedding: &[f32]) -> Result<()> {
        let entry = CacheEntry {
            text: text.chars().take(100).collect(),
            embedding: embedding.to_vec(),
        };
        tokio::fs::write(self.cache_path(key), serde_json::to_vec(&entry)?).await?;
        Ok(())
    }

    /// Embed `text`, consulting and populating the cache.
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text_with(text, true).await
    }

    /// Embed `text` with explicit cache control.
    ///
    /// `use_cache = false` bypasses both the read and the write path; the
    /// provider call is still retried per the configured policy.
    pub async fn embed_text_with(&self, text: &str, use_cache: bool) -> Result<Vec<f32>> {
        let key = Self::cache_key(text);

        if use_cache {
            if let Some(embedding) = self.load_cached(&self.cache_path(&key)).await {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("embedding cache hit for {key}");
                return Ok(embedding);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let embedding = self.retry.run(|| self.provider.embed(text)).await?;

        if use_cache {
            self.store(text, &key, &embedding).await?;
        }
        Ok(embedding)
    }

    /// Embed several texts; output order matches input order.
    ///
    /// Identical uncached texts within one batch resolve to a single
    /// provider call via an in-memory de-duplication map.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut resolved: HashMap<String, Vec<f32>> = HashMap::new();
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let key = Self::cache_key(text);
            if let Some(embedding) = resolved.get(&key) {
                out.push(embedding.clone());
                continue;
            }
            let embedding = self.embed_text(text).await?;
            resolved.insert(key, embedding.clone());
            out.push(embedding);
        }
        Ok(out)
    }

    /// Current hit/miss counters and the number of entries on disk.
    pub async fn statistics(&self) -> Result<CacheStatistics> {
        let mut entries = 0;
        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                entries += 1;
            }
        }

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests > 0 {
            hits as f64 / total_requests as f64
        } else {
            0.0
        };

        Ok(CacheStatistics {
            hits,
            misses,
            total_requests,
            hit_rate,
            entries,
        })
    }

    /// Delete every cached entry and reset the counters.
    pub async fn clear(&self) -> Result<()> {
        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.path().extension().is_some_and(|ext| ext == "json") {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        tracing::info!("embedding cache cleared at {}", self.cache_dir.display());
        Ok(())
    }
}
