//! Flat inner-product vector index with metadata filtering and persistence.
//!
//! Embeddings are L2-normalized on insertion so that inner product equals
//! cosine similarity. The index is append-only: entries keep their insertion
//! offset for the lifetime of the index, and the only way to remove one is
//! [`VectorIndex::clear`] followed by a rebuild. Search is exact brute-force
//! scoring, which is both precise and fast at knowledge-base scale.
//!
//! Persistence writes three co-located files per named artifact: the binary
//! vector data, the parallel document list (JSON), and a statistics
//! snapshot (JSON). Each file is written to a temporary file in the target
//! directory and renamed into place, so a reader never observes a torn
//! artifact.

use crate::error::{Result, RetrievalError};
use crate::loader::{ChunkMetadata, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_DIMENSION: usize = 1536;

// Over-fetch multiplier for filtered searches. A very selective filter can
// still return fewer than k results even though more matches exist deeper
// in the ranked list; callers treat that as documented approximate
// behavior, not an error.
const FILTER_OVERFETCH: usize = 3;

/// Metadata filter for similarity search: every key must match (logical
/// AND). A list-valued indexed field matches when it shares at least one
/// element with the filter value/list; a scalar field requires exact
/// equality. Entries with no stored value for a filtered key never match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter(pub BTreeMap<String, Value>);

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Filter for chunks tagged with `intent` (uppercased canonical form).
    pub fn for_intent(intent: &str) -> Self {
        Self::new().with(
            "intents",
            Value::Array(vec![Value::String(intent.to_uppercase())]),
        )
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.0.iter().all(|(key, expected)| {
            let Some(actual) = metadata.get(key) else {
                return false;
            };
            match (&actual, expected) {
                (Value::Array(items), Value::Array(wanted)) => {
                    wanted.iter().any(|w| items.contains(w))
                }
                (Value::Array(items), scalar) => items.contains(scalar),
                (actual, expected) => *actual == *expected,
            }
        })
    }
}

/// Aggregate statistics over the indexed entries.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatistics {
    pub total_vectors: usize,
    pub dimension: usize,
    pub unique_documents: usize,
    pub unique_intents: Vec<String>,
    pub document_types: BTreeMap<String, usize>,
    pub index_size_mb: f64,
}

#[derive(Serialize, Deserialize)]
struct PersistedDocuments {
    dimension: usize,
    documents: Vec<Document>,
}

#[derive(Serialize)]
struct StatsSnapshot {
    saved_at: i64,
    #[serde(flatten)]
    statistics: IndexStatistics,
}

/// Append-only similarity-search index over fixed-dimension vectors.
pub struct VectorIndex {
    dimension: usize,
    index_dir: PathBuf,
    // Row-major, len == documents.len() * dimension.
    vectors: Vec<f32>,
    documents: Vec<Document>,
}

impl VectorIndex {
    /// Create an empty index of the given dimension, persisting under
    /// `index_dir`.
    pub fn new(dimension: usize, index_dir: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            index_dir: index_dir.into(),
            vectors: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dimension..(i + 1) * self.dimension]
    }

    /// Append documents with their embeddings, in input order.
    ///
    /// Each embedding is L2-normalized before storage. Fails with
    /// [`RetrievalError::DimensionMismatch`] when the counts disagree or a
    /// vector has the wrong length; nothing is inserted in that case.
    pub fn add_documents(
        &mut self,
        documents: Vec<Document>,
        embeddings: &[Vec<f32>],
    ) -> Result<()> {
        if documents.len() != embeddings.len() {
            return Err(RetrievalError::DimensionMismatch {
                expected: documents.len(),
                actual: embeddings.len(),
            });
        }
        for embedding in embeddings {
            if embedding.len() != self.dimension {
                return Err(RetrievalError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
        }

        for embedding in embeddings {
            let mut vector = embedding.clone();
            l2_normalize(&mut vector);
            self.vectors.extend_from_slice(&vector);
        }
        self.documents.extend(documents);
        Ok(())
    }

    /// Exact top-`k` search by inner product, with optional post-filtering.
    ///
    /// When a filter is present the index ranks `3 * k` candidates before
    /// filtering, so a selective filter may yield fewer than `k` results
    /// even though more matches exist further down the ranking. An index
    /// holding fewer than `k` entries simply returns them all.
    pub fn similarity_search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(Document, f32)>> {
        if query_embedding.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query_embedding.len(),
            });
        }
        if k == 0 || self.documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query_embedding.to_vec();
        l2_normalize(&mut query);

        let search_k = if filter.is_some() {
            k.saturating_mul(FILTER_OVERFETCH)
        } else {
            k
        };

        let mut scored: Vec<(usize, f32)> = (0..self.documents.len())
            .map(|i| (i, dot(self.row(i), &query)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(search_k);

        let mut results = Vec::new();
        for (idx, score) in scored {
            if let Some(filter) = filter {
                if !filter.matches(&self.documents[idx].metadata) {
                    continue;
                }
            }
            results.push((self.documents[idx].clone(), score));
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }

    fn vector_file(&self, name: &str) -> PathBuf {
        self.index_dir.join(format!("{name}.vec"))
    }

    fn documents_file(&self, name: &str) -> PathBuf {
        self.index_dir.join(format!("{name}.documents.json"))
    }

    fn stats_file(&self, name: &str) -> PathBuf {
        self.index_dir.join(format!("{name}.stats.json"))
    }

    /// Persist the index under `name`: binary vectors, document list, and a
    /// statistics snapshot.
    pub fn save(&self, name: &str) -> Result<()> {
        std::fs::create_dir_all(&self.index_dir)?;

        let mut payload = Vec::with_capacity(16 + self.vectors.len() * 4);
        payload.extend_from_slice(&(self.documents.len() as u64).to_le_bytes());
        payload.extend_from_slice(&(self.dimension as u64).to_le_bytes());
        payload.extend_from_slice(bytemuck::cast_slice::<f32, u8>(&self.vectors));
        self.write_atomic(&self.vector_file(name), &payload)?;

        let persisted = PersistedDocuments {
            dimension: self.dimension,
            documents: self.documents.clone(),
        };
        self.write_atomic(&self.documents_file(name), &serde_json::to_vec(&persisted)?)?;

        let snapshot = StatsSnapshot {
            saved_at: chrono::Utc::now().timestamp(),
            statistics: self.statistics(),
        };
        self.write_atomic(&self.stats_file(name), &serde_json::to_vec_pretty(&snapshot)?)?;

        tracing::info!(
            "saved index '{name}' ({} vectors, dim {}) under {}",
            self.documents.len(),
            self.dimension,
            self.index_dir.display()
        );
        Ok(())
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.index_dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(path)
            .map_err(|e| RetrievalError::Io { source: e.error })?;
        Ok(())
    }

    /// Restore a persisted index.
    ///
    /// A missing vector file is the signal for
    /// [`RetrievalError::IndexNotFound`]; present-but-inconsistent files
    /// fail with [`RetrievalError::CorruptArtifact`].
    pub fn load(index_dir: impl Into<PathBuf>, name: &str) -> Result<Self> {
        let index_dir = index_dir.into();
        let vector_path = index_dir.join(format!("{name}.vec"));
        if !vector_path.exists() {
            return Err(RetrievalError::IndexNotFound {
                name: name.to_string(),
                dir: index_dir,
            });
        }

        let bytes = std::fs::read(&vector_path)?;
        if bytes.len() < 16 {
            return Err(RetrievalError::corrupt("vector file shorter than header"));
        }
        let count = u64::from_le_bytes(bytes[0..8].try_into().unwrap()) as usize;
        let dimension = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
        let payload = &bytes[16..];
        if payload.len() != count * dimension * size_of::<f32>() {
            return Err(RetrievalError::corrupt(format!(
                "vector payload is {} bytes, expected {} ({count} x {dimension})",
                payload.len(),
                count * dimension * size_of::<f32>()
            )));
        }
        let vectors: Vec<f32> = payload
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes(chunk.try_into().unwrap()))
            .collect();

        let documents_path = index_dir.join(format!("{name}.documents.json"));
        let documents_bytes = std::fs::read(&documents_path).map_err(|e| {
            RetrievalError::corrupt(format!(
                "document list {} unreadable: {e}",
                documents_path.display()
            ))
        })?;
        let persisted: PersistedDocuments = serde_json::from_slice(&documents_bytes)?;
        if persisted.documents.len() != count {
            return Err(RetrievalError::corrupt(format!(
                "{} documents but {count} vectors",
                persisted.documents.len()
            )));
        }
        if persisted.dimension != dimension {
            return Err(RetrievalError::corrupt(format!(
                "document list says dimension {}, vector file says {dimension}",
                persisted.dimension
            )));
        }

        tracing::info!("loaded index '{name}' ({count} vectors, dim {dimension})");
        Ok(Self {
            dimension,
            index_dir,
            vectors,
            documents: persisted.documents,
        })
    }

    /// Aggregate statistics over the indexed entries.
    pub fn statistics(&self) -> IndexStatistics {
        let mut unique_intents = BTreeSet::new();
        let mut document_types: BTreeMap<String, usize> = BTreeMap::new();
        let mut document_ids = BTreeSet::new();

        for doc in &self.documents {
            unique_intents.extend(doc.metadata.intents.iter().cloned());
            let doc_type = doc
                .metadata
                .document_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *document_types.entry(doc_type).or_default() += 1;
            if let Some(id) = &doc.metadata.document_id {
                document_ids.insert(id.clone());
            }
        }

        IndexStatistics {
            total_vectors: self.documents.len(),
            dimension: self.dimension,
            unique_documents: document_ids.len(),
            unique_intents: unique_intents.into_iter().collect(),
            document_types,
            index_size_mb: (self.documents.len() * self.dimension * size_of::<f32>()) as f64
                / (1024.0 * 1024.0),
        }
    }

    /// Reset to an empty index of the same dimension.
    pub fn clear(&mut self) {
        self.vectors.clear();
        self.documents.clear();
    }
}

fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
