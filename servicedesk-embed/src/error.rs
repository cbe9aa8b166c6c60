//! Error types for the embedding subsystem.

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Failures from embedding providers and the embedding cache.
///
/// Network and API failures from a provider surface as [`EmbedError::Provider`]
/// for a single call; once the retry policy gives up they are wrapped in
/// [`EmbedError::RetriesExhausted`], which is what callers of the cache see.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// A single embedding provider call failed (network, API, or decode).
    #[error("embedding provider call failed: {message}")]
    Provider { message: String },

    /// The provider kept failing through every retry attempt.
    #[error("embedding provider failed after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<EmbedError>,
    },

    /// The provider returned a vector of the wrong length.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid provider or cache configuration.
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// IO errors while reading or writing cache entries.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Cache entry (de)serialization errors.
    #[error("serialization error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl EmbedError {
    /// Wrap a provider-side failure message.
    pub fn provider<S: Into<String>>(message: S) -> Self {
        Self::Provider {
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
