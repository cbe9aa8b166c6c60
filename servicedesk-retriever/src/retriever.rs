//! Query-time retrieval facade.
//!
//! Composes the embedding cache and the vector index: embed the query,
//! search with an optional intent filter, drop weak matches, boost
//! intent-matched candidates, and format the survivors into a context block
//! for the generation prompt.

use crate::error::Result;
use crate::index::{MetadataFilter, VectorIndex};
use crate::loader::Document;
use serde::{Deserialize, Serialize};
use servicedesk_embed::EmbeddingCache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.5;
pub const DEFAULT_INTENT_BOOST: f32 = 1.5;
pub const DEFAULT_CONTEXT_LENGTH: usize = 2000;

/// Tunable retrieval parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Number of documents to return per query.
    pub top_k: usize,
    /// Minimum raw cosine similarity for a candidate to survive.
    pub similarity_threshold: f32,
    /// Multiplier applied to candidates matching the requested intent.
    pub intent_boost: f32,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            intent_boost: DEFAULT_INTENT_BOOST,
        }
    }
}

/// Pull-based retrieval metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RetrieverMetrics {
    pub retrieval_count: u64,
    pub total_results: u64,
    pub avg_results_per_query: f64,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub intent_boost: f32,
}

/// High-level retrieval service combining one index and one embedding cache.
///
/// Query-time operations are read-only: the index sits behind a reader lock
/// and the metric counters are atomics, so concurrent requests may share one
/// retriever. Construction is caller-owned (loader, cache, index, then
/// retriever); there is no hidden global instance.
pub struct Retriever {
    index: Arc<RwLock<VectorIndex>>,
    cache: Arc<EmbeddingCache>,
    config: RetrieverConfig,
    retrieval_count: AtomicU64,
    total_results: AtomicU64,
}

impl Retriever {
    /// Wrap an index and cache with the default configuration.
    pub fn new(index: VectorIndex, cache: Arc<EmbeddingCache>) -> Self {
        Self::with_config(
            Arc::new(RwLock::new(index)),
            cache,
            RetrieverConfig::default(),
        )
    }

    pub fn with_config(
        index: Arc<RwLock<VectorIndex>>,
        cache: Arc<EmbeddingCache>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            index,
            cache,
            config,
            retrieval_count: AtomicU64::new(0),
            total_results: AtomicU64::new(0),
        }
    }

    /// Shared handle to the underlying index.
    pub fn index(&self) -> Arc<RwLock<VectorIndex>> {
        self.index.clone()
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Retrieve the most relevant documents for `query`.
    ///
    /// With an intent, candidates are restricted to chunks tagged with it
    /// (uppercased) and their scores boosted by `intent_boost` before the
    /// final ranking; without one, the index ordering passes through
    /// unchanged. Candidates below `similarity_threshold` are dropped
    /// before boosting. `top_k` overrides the configured value.
    pub async fn retrieve(
        &self,
        query: &str,
        intent: Option<&str>,
        top_k: Option<usize>,
    ) -> Result<Vec<Document>> {
        let k = top_k.unwrap_or(self.config.top_k);

        let query_embedding = self.cache.embed_text(query).await?;

        let filter = intent.map(MetadataFilter::for_intent);

        // Over-fetch so thresholding and re-ranking have headroom before
        // the truncation to k.
        let candidates = {
            let index = self.index.read().unwrap();
            index.similarity_search(&query_embedding, k.saturating_mul(2), filter.as_ref())?
        };

        let mut scored: Vec<(Document, f32)> = candidates
            .into_iter()
            .filter(|(_, score)| *score >= self.config.similarity_threshold)
            .collect();

        if let Some(intent) = intent {
            rerank_by_intent(&mut scored, intent, self.config.intent_boost);
        }

        scored.truncate(k);

        self.retrieval_count.fetch_add(1, Ordering::Relaxed);
        self.total_results
            .fetch_add(scored.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            "retrieved {} documents (intent: {})",
            scored.len(),
            intent.unwrap_or("none")
        );

        Ok(scored.into_iter().map(|(doc, _)| doc).collect())
    }

    /// Format retrieved documents as a context block for the LLM prompt.
    ///
    /// Documents are included whole, left to right, until the next one
    /// would push the assembled bodies past `max_length`; that document
    /// and everything after it are dropped rather than truncated
    /// mid-content. An empty input returns the literal
    /// `"No relevant context found."`.
    pub fn format_context(&self, documents: &[Document], max_length: usize) -> String {
        if documents.is_empty() {
            return "No relevant context found.".to_string();
        }

        let mut parts: Vec<String> = Vec::new();
        let mut current_length = 0;

        for (i, doc) in documents.iter().enumerate() {
            let doc_id = doc.metadata.document_id.as_deref().unwrap_or("UNKNOWN");
            let title = doc.metadata.title.as_deref().unwrap_or("Untitled");
            let block = format!(
                "[Document {} - {}: {}]\n{}\n",
                i + 1,
                doc_id,
                title,
                doc.content
            );

            if current_length + block.len() > max_length {
                break;
            }
            current_length += block.len();
            parts.push(block);
        }

        format!("**Relevant Policy Context:**\n\n{}", parts.join("\n---\n\n"))
    }

    /// Current retrieval metrics and the active configuration.
    pub fn metrics(&self) -> RetrieverMetrics {
        let retrieval_count = self.retrieval_count.load(Ordering::Relaxed);
        let total_results = self.total_results.load(Ordering::Relaxed);
        RetrieverMetrics {
            retrieval_count,
            total_results,
            avg_results_per_query: if retrieval_count > 0 {
                total_results as f64 / retrieval_count as f64
            } else {
                0.0
            },
            top_k: self.config.top_k,
            similarity_threshold: self.config.similarity_threshold,
            intent_boost: self.config.intent_boost,
        }
    }
}

// Multiply the score of every intent-matched candidate by `boost`, then
// re-sort descending. The sort is stable: ties keep their prior order.
fn rerank_by_intent(results: &mut [(Document, f32)], intent: &str, boost: f32) {
    let intent = intent.to_uppercase();
    for (doc, score) in results.iter_mut() {
        if doc.metadata.intents.iter().any(|i| i == &intent) {
            *score *= boost;
        }
    }
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}
