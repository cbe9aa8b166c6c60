//! servicedesk-retriever: the retrieval engine behind the customer-service
//! assistant.
//!
//! Loads the policy/FAQ knowledge base, chunks and embeds it into a vector
//! index, and answers query-time retrieval requests with filtered
//! similarity search, intent-aware re-ranking, and context formatting.
//!
//! ## Key Modules
//!
//! - **[`loader`]**: document loading, chunking, and metadata propagation
//! - **[`index`]**: the vector index with filtered search and persistence
//! - **[`retriever`]**: the query-time facade and context formatter
//! - **[`config`]**: engine configuration (TOML)
//! - **[`error`]**: typed failures at the engine boundary
//!
//! ## Architecture
//!
//! ```text
//! knowledge_base/*.md → DocumentLoader → EmbeddingCache → VectorIndex
//!                                                            ↓
//!                       format_context ← Retriever ← similarity_search
//! ```
//!
//! Construction is explicit and caller-owned, in dependency order: build a
//! [`DocumentLoader`], an [`EmbeddingCache`](servicedesk_embed::EmbeddingCache),
//! and a [`VectorIndex`], then hand the last two to a [`Retriever`] shared
//! by request handlers.

pub mod config;
pub mod error;
pub mod index;
pub mod loader;
pub mod retriever;

pub use config::EngineConfig;
pub use error::{Result, RetrievalError};
pub use index::{IndexStatistics, MetadataFilter, VectorIndex};
pub use loader::{
    ChunkMetadata, Document, DocumentLoader, LoaderStatistics, embed_documents,
};
pub use retriever::{Retriever, RetrieverConfig, RetrieverMetrics};
