//! Text chunking primitives for the servicedesk retrieval engine.
//!
//! The [`text`] module turns raw knowledge-base documents into bounded,
//! overlapping chunks suitable for embedding and similarity search.

pub mod text;

pub use text::{DEFAULT_SEPARATORS, TextChunk, TextSplitter};
