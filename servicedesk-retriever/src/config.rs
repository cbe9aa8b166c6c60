//! Engine configuration.
//!
//! One TOML file describes the whole engine: corpus location, chunking
//! parameters, embedding provider, and retrieval tuning. Every field has a
//! default, so a missing file or a partial file both work.

use crate::error::{Result, RetrievalError};
use crate::retriever::RetrieverConfig;
use serde::Deserialize;
use servicedesk_embed::HttpProviderConfig;
use std::path::{Path, PathBuf};

/// Top-level configuration for building and serving the index.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Knowledge-base directory holding `policies/`, `faqs/`, and
    /// `metadata.json`.
    pub knowledge_base: PathBuf,
    /// Directory holding persisted index artifacts.
    pub index_dir: PathBuf,
    /// Artifact name used by save/load.
    pub index_name: String,
    /// Embedding cache directory.
    pub cache_dir: PathBuf,
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrieverConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            knowledge_base: PathBuf::from("knowledge_base"),
            index_dir: PathBuf::from("vector_index"),
            index_name: "knowledge_base".to_string(),
            cache_dir: PathBuf::from(".embedding_cache"),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrieverConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|err| RetrievalError::config(format!("{}: {err}", path.display())))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: crate::loader::DEFAULT_CHUNK_SIZE,
            chunk_overlap: crate::loader::DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Embedding provider settings. The API key is read from the environment
/// rather than stored in the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub api_key_env: String,
    pub model: String,
    pub dimension: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: crate::index::DEFAULT_DIMENSION,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    /// Resolve into a provider config, pulling the key from the configured
    /// environment variable.
    pub fn provider_config(&self) -> Result<HttpProviderConfig> {
        let api_key = std::env::var(&self.api_key_env).map_err(|_| {
            RetrievalError::config(format!(
                "environment variable {} is not set",
                self.api_key_env
            ))
        })?;
        Ok(HttpProviderConfig {
            api_base: self.api_base.clone(),
            api_key,
            model: self.model.clone(),
            dimension: self.dimension,
            timeout_secs: self.timeout_secs,
        })
    }
}
