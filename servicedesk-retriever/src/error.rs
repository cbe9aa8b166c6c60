//! Error types for the retrieval engine.

use servicedesk_embed::EmbedError;
use std::path::PathBuf;

/// Result type for retrieval operations.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Typed failures at the retrieval engine boundary.
///
/// Loader-level per-document errors are recovered locally by the batch
/// operations (skip and continue); everything else propagates unchanged to
/// the immediate caller. The engine never downgrades a provider failure to
/// an empty context — that policy decision belongs to the orchestration
/// layer.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// A source document could not be read or decoded as text.
    #[error("failed to load document {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// Documents and embeddings disagree in count, or a vector has the
    /// wrong dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// No persisted index artifact exists under the requested name.
    #[error("index '{name}' not found under {dir}")]
    IndexNotFound { name: String, dir: PathBuf },

    /// A persisted artifact exists but its parts disagree.
    #[error("index artifact corrupt: {message}")]
    CorruptArtifact { message: String },

    /// Invalid engine configuration.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The embedding layer failed (retries already exhausted).
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl RetrievalError {
    /// Create a document load error.
    pub fn load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Load {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a corrupt-artifact error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptArtifact {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
