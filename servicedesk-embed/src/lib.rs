//! # servicedesk-embed
//!
//! Embedding generation for the servicedesk retrieval engine: a provider
//! abstraction over external embedding APIs, an explicit retry policy, and a
//! durable content-addressed cache that makes repeated index rebuilds cheap.
//!
//! ## Architecture
//!
//! - [`provider`]: the [`EmbeddingProvider`] trait plus the HTTP-backed and
//!   mock implementations
//! - [`retry`]: bounded exponential backoff around provider calls
//! - [`cache`]: the disk-backed [`EmbeddingCache`], keyed by a hash of the
//!   exact input text
//! - [`error`]: typed failures ([`EmbedError`])
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use servicedesk_embed::{EmbeddingCache, MockEmbeddingProvider};
//!
//! # async fn example() -> servicedesk_embed::Result<()> {
//! let provider = Arc::new(MockEmbeddingProvider::new(1536));
//! let cache = EmbeddingCache::new(provider, ".embedding_cache").await?;
//!
//! let vector = cache.embed_text("How do I update my address?").await?;
//! assert_eq!(vector.len(), 1536);
//! # Ok(())
//! # }
//! ```
//!
//! Identical text always resolves to the same cache entry regardless of
//! where it appears in the corpus, so a chunking-parameter tweak only pays
//! for the chunks that actually changed.

pub mod cache;
pub mod error;
pub mod provider;
pub mod retry;

pub use cache::{CacheStatistics, EmbeddingCache};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, HttpEmbeddingProvider, HttpProviderConfig, MockEmbeddingProvider,
};
pub use retry::RetryPolicy;
