//! Knowledge-base document loading, chunking, and metadata propagation.
//!
//! The knowledge base is a directory with two sub-collections, `policies/`
//! and `faqs/`, holding markdown documents, plus an optional `metadata.json`
//! index mapping relative document paths to structured metadata (id, type,
//! title, intents, keywords, version, compliance tags). Individual documents
//! may additionally carry YAML front-matter; front-matter keys take
//! precedence over the corpus index, which takes precedence over defaults.

use crate::error::{Result, RetrievalError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use servicedesk_context::TextSplitter;
use servicedesk_embed::EmbeddingCache;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// An immutable unit of retrievable text: one chunk plus its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Chunk metadata: a fixed set of well-known optional fields plus an
/// escape-hatch bag for unrecognized front-matter keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Intent tags this chunk is relevant to, uppercase canonical form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compliance_tags: Vec<String>,
    /// 0-based position of this chunk within its parent document.
    pub chunk_index: usize,
    /// Chunk count of the parent document; constant across its chunks.
    pub total_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Unrecognized metadata keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ChunkMetadata {
    /// Look up any field, well-known or extra, as a JSON value.
    ///
    /// Returns `None` when the field has no stored value, which is how
    /// metadata filters treat absent keys.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "document_id" => self.document_id.clone().map(Value::String),
            "document_type" => self.document_type.clone().map(Value::String),
            "title" => self.title.clone().map(Value::String),
            "version" => self.version.clone().map(Value::String),
            "intents" => Some(string_array(&self.intents)),
            "keywords" => Some(string_array(&self.keywords)),
            "compliance_tags" => Some(string_array(&self.compliance_tags)),
            "chunk_index" => Some(Value::from(self.chunk_index)),
            "total_chunks" => Some(Value::from(self.total_chunks)),
            "source" => self.source.clone().map(Value::String),
            "file_name" => self.file_name.clone().map(Value::String),
            _ => self.extra.get(key).cloned(),
        }
    }

    // Route a front-matter key into its well-known field, or park it in
    // `extra` if unrecognized.
    fn apply_value(&mut self, key: &str, value: Value) {
        match key {
            "document_id" | "id" => {
                if let Some(s) = string_value(&value) {
                    self.document_id = Some(s);
                }
            }
            "document_type" => {
                if let Some(s) = string_value(&value) {
                    self.document_type = Some(s);
                }
            }
            "title" => {
                if let Some(s) = string_value(&value) {
                    self.title = Some(s);
                }
            }
            "version" => {
                if let Some(s) = string_value(&value) {
                    self.version = Some(s);
                }
            }
            "intents" => self.intents = string_list(&value).iter().map(|i| i.to_uppercase()).collect(),
            "keywords" => self.keywords = string_list(&value),
            "compliance_tags" => self.compliance_tags = string_list(&value),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}

fn string_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(string_value).collect(),
        other => string_value(other).into_iter().collect(),
    }
}

/// The static per-corpus metadata index (`metadata.json`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorpusMetadata {
    #[serde(default)]
    pub documents: Vec<CorpusDocumentEntry>,
    #[serde(default)]
    pub intent_mapping: serde_json::Map<String, Value>,
}

/// One document record in the corpus metadata index.
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusDocumentEntry {
    pub id: Option<String>,
    pub file_path: String,
    pub document_type: Option<String>,
    pub title: Option<String>,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub compliance_tags: Vec<String>,
}

/// Aggregate statistics over the loaded corpus.
#[derive(Debug, Clone, Serialize)]
pub struct LoaderStatistics {
    pub total_chunks: usize,
    pub total_characters: usize,
    pub avg_chunk_size: usize,
    pub unique_intents: Vec<String>,
    pub document_types: BTreeMap<String, usize>,
}

/// Loads and chunks knowledge-base documents.
pub struct DocumentLoader {
    knowledge_base: PathBuf,
    splitter: TextSplitter,
    corpus: CorpusMetadata,
}

impl DocumentLoader {
    /// Create a loader with the default chunking parameters (500-character
    /// chunks, 50-character overlap).
    pub fn new(knowledge_base: impl Into<PathBuf>) -> Self {
        Self::with_chunking(knowledge_base, DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }

    /// Create a loader with explicit chunking parameters. The corpus
    /// metadata index is read once here; its absence is not an error.
    pub fn with_chunking(
        knowledge_base: impl Into<PathBuf>,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        let knowledge_base = knowledge_base.into();
        let corpus = Self::load_corpus_metadata(&knowledge_base);
        Self {
            knowledge_base,
            splitter: TextSplitter::with_defaults(chunk_size, chunk_overlap),
            corpus,
        }
    }

    pub fn knowledge_base(&self) -> &Path {
        &self.knowledge_base
    }

    fn load_corpus_metadata(knowledge_base: &Path) -> CorpusMetadata {
        let path = knowledge_base.join("metadata.json");
        match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(corpus) => corpus,
                Err(err) => {
                    tracing::warn!("invalid corpus metadata {}: {err}", path.display());
                    CorpusMetadata::default()
                }
            },
            Err(_) => CorpusMetadata::default(),
        }
    }

    // Corpus index entries are written relative to the knowledge base's
    // parent directory ("knowledge_base/policies/x.md"); the kb-relative
    // form is accepted too.
    fn corpus_entry(&self, path: &Path) -> Option<&CorpusDocumentEntry> {
        let rel = path.strip_prefix(&self.knowledge_base).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        let qualified = self
            .knowledge_base
            .file_name()
            .map(|name| format!("{}/{rel}", name.to_string_lossy()));
        self.corpus.documents.iter().find(|doc| {
            doc.file_path == rel || qualified.as_deref() == Some(doc.file_path.as_str())
        })
    }

    fn base_metadata(&self, path: &Path) -> ChunkMetadata {
        let mut metadata = ChunkMetadata::default();
        if let Some(entry) = self.corpus_entry(path) {
            metadata.document_id = entry.id.clone();
            metadata.document_type = entry.document_type.clone();
            metadata.title = entry.title.clone();
            metadata.version = entry.version.clone();
            metadata.intents = entry.intents.iter().map(|i| i.to_uppercase()).collect();
            metadata.keywords = entry.keywords.clone();
            metadata.compliance_tags = entry.compliance_tags.clone();
        }
        metadata
    }

    // Split YAML front-matter off the head of `content`. Parse errors are
    // non-fatal: the document degrades to empty front-matter.
    fn extract_front_matter<'a>(
        path: &Path,
        content: &'a str,
    ) -> (serde_json::Map<String, Value>, &'a str) {
        let Some((yaml, body)) = split_front_matter(content) else {
            return (serde_json::Map::new(), content);
        };
        match serde_yaml::from_str::<serde_yaml::Value>(yaml)
            .ok()
            .and_then(|value| serde_json::to_value(value).ok())
        {
            Some(Value::Object(map)) => (map, body),
            _ => {
                tracing::warn!("unparseable front-matter in {}, ignoring", path.display());
                (serde_json::Map::new(), content)
            }
        }
    }

    /// Load one document: decode, merge metadata, split into chunks.
    ///
    /// Fails with [`RetrievalError::Load`] when the file cannot be read or
    /// is not valid UTF-8.
    pub fn load_document(&self, path: &Path) -> Result<Vec<Document>> {
        let bytes = std::fs::read(path).map_err(|e| RetrievalError::load(path, e.to_string()))?;
        let content = String::from_utf8(bytes)
            .map_err(|_| RetrievalError::load(path, "not valid UTF-8 text"))?;

        let (front_matter, body) = Self::extract_front_matter(path, &content);

        let mut base = self.base_metadata(path);
        for (key, value) in front_matter {
            base.apply_value(&key, value);
        }
        base.source = Some(path.display().to_string());
        base.file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());

        let chunks = self.splitter.split(body);
        let total_chunks = chunks.len();
        tracing::debug!("split {} into {total_chunks} chunks", path.display());

        Ok(chunks
            .into_iter()
            .map(|chunk| {
                let mut metadata = base.clone();
                metadata.chunk_index = chunk.sequence;
                metadata.total_chunks = total_chunks;
                Document {
                    content: chunk.text,
                    metadata,
                }
            })
            .collect())
    }

    /// Load every document in the `policies/` and `faqs/` sub-collections.
    ///
    /// A document that fails to load is logged and skipped; one bad file
    /// never aborts the corpus load.
    pub fn load_all_documents(&self) -> Vec<Document> {
        let mut all = Vec::new();
        for collection in ["policies", "faqs"] {
            let dir = self.knowledge_base.join(collection);
            if !dir.is_dir() {
                continue;
            }
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!("cannot enumerate {}: {err}", dir.display());
                    continue;
                }
            };
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
                .collect();
            paths.sort();

            for path in paths {
                match self.load_document(&path) {
                    Ok(documents) => all.extend(documents),
                    Err(err) => tracing::warn!("skipping document: {err}"),
                }
            }
        }
        all
    }

    /// Load all documents whose `intents` contain `intent` (case-insensitive).
    pub fn load_documents_by_intent(&self, intent: &str) -> Vec<Document> {
        let intent = intent.to_uppercase();
        self.load_all_documents()
            .into_iter()
            .filter(|doc| doc.metadata.intents.iter().any(|i| i == &intent))
            .collect()
    }

    /// Aggregate statistics over a full corpus load.
    pub fn statistics(&self) -> LoaderStatistics {
        let documents = self.load_all_documents();
        let total_chunks = documents.len();
        let total_characters: usize = documents.iter().map(|doc| doc.content.len()).sum();

        let mut unique_intents = BTreeSet::new();
        let mut document_types: BTreeMap<String, usize> = BTreeMap::new();
        for doc in &documents {
            unique_intents.extend(doc.metadata.intents.iter().cloned());
            let doc_type = doc
                .metadata
                .document_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *document_types.entry(doc_type).or_default() += 1;
        }

        LoaderStatistics {
            total_chunks,
            total_characters,
            avg_chunk_size: if total_chunks > 0 {
                total_characters / total_chunks
            } else {
                0
            },
            unique_intents: unique_intents.into_iter().collect(),
            document_types,
        }
    }
}

// Returns (yaml, body) if `content` opens with a front-matter fence.
fn split_front_matter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    for (idx, _) in rest.match_indices("\n---") {
        let after = &rest[idx + 4..];
        let after = after.strip_prefix('\r').unwrap_or(after);
        if after.is_empty() {
            return Some((&rest[..idx], ""));
        }
        if let Some(body) = after.strip_prefix('\n') {
            return Some((&rest[..idx], body));
        }
    }
    None
}

/// Embed chunk contents through the cache, order-preserving.
pub async fn embed_documents(
    cache: &EmbeddingCache,
    documents: &[Document],
) -> servicedesk_embed::Result<Vec<Vec<f32>>> {
    let texts: Vec<String> = documents.iter().map(|doc| doc.content.clone()).collect();
    cache.embed_texts(&texts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::{TempDir, tempdir};

    // A knowledge base shaped like the production corpus: two collections
    // and a metadata.json written relative to the kb's parent directory.
    fn sample_knowledge_base() -> Result<(TempDir, PathBuf)> {
        let temp = tempdir()?;
        let kb = temp.path().join("knowledge_base");
        std::fs::create_dir_all(kb.join("policies"))?;
        std::fs::create_dir_all(kb.join("faqs"))?;

        std::fs::write(
            kb.join("policies/address_update.md"),
            "# Address Update Policy\n\nCustomers may update their address online.\n\n\
             ## Verification\n\nIdentity must be verified before any change.\n",
        )?;
        std::fs::write(
            kb.join("faqs/address_faq.md"),
            "# Address FAQ\n\n## Q: How long does an update take?\nA: Up to 2 business days.\n",
        )?;

        let metadata = serde_json::json!({
            "documents": [
                {
                    "id": "POL-001",
                    "file_path": "knowledge_base/policies/address_update.md",
                    "document_type": "policy",
                    "title": "Address Update Policy",
                    "intents": ["address_update"],
                    "keywords": ["address", "update"],
                    "version": "1.2",
                    "compliance_tags": ["KYC"]
                },
                {
                    "id": "FAQ-001",
                    "file_path": "faqs/address_faq.md",
                    "document_type": "faq",
                    "title": "Address FAQ",
                    "intents": ["ADDRESS_UPDATE", "GENERAL_INQUIRY"]
                }
            ],
            "intent_mapping": { "ADDRESS_UPDATE": { "primary_documents": ["POL-001"] } }
        });
        std::fs::write(kb.join("metadata.json"), serde_json::to_vec(&metadata)?)?;

        Ok((temp, kb))
    }

    #[test]
    fn test_load_document_propagates_corpus_metadata() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        let loader = DocumentLoader::new(&kb);

        let documents = loader.load_document(&kb.join("policies/address_update.md"))?;

        assert!(!documents.is_empty());
        for doc in &documents {
            assert_eq!(doc.metadata.document_id.as_deref(), Some("POL-001"));
            assert_eq!(doc.metadata.document_type.as_deref(), Some("policy"));
            assert_eq!(doc.metadata.intents, vec!["ADDRESS_UPDATE"]);
            assert_eq!(doc.metadata.compliance_tags, vec!["KYC"]);
            assert_eq!(doc.metadata.file_name.as_deref(), Some("address_update.md"));
        }
        Ok(())
    }

    #[test]
    fn test_chunk_index_invariants() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        // Force several chunks per document.
        let long_doc: String = (0..40)
            .map(|i| format!("## Section {i}\n\nDetails about clause number {i}.\n\n"))
            .collect();
        std::fs::write(kb.join("policies/long_policy.md"), &long_doc)?;

        let loader = DocumentLoader::with_chunking(&kb, 200, 20);
        let documents = loader.load_document(&kb.join("policies/long_policy.md"))?;

        assert!(documents.len() > 1);
        for (i, doc) in documents.iter().enumerate() {
            assert_eq!(doc.metadata.chunk_index, i);
            assert_eq!(doc.metadata.total_chunks, documents.len());
        }
        Ok(())
    }

    #[test]
    fn test_front_matter_overrides_corpus_index() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        std::fs::write(
            kb.join("policies/address_update.md"),
            "---\ntitle: Overridden Title\nintents: [relocation]\nreview_cycle: quarterly\n---\n\
             Customers may update their address online.\n",
        )?;

        let loader = DocumentLoader::new(&kb);
        let documents = loader.load_document(&kb.join("policies/address_update.md"))?;

        let meta = &documents[0].metadata;
        assert_eq!(meta.title.as_deref(), Some("Overridden Title"));
        assert_eq!(meta.intents, vec!["RELOCATION"]);
        // Corpus-index fields without a front-matter override survive.
        assert_eq!(meta.document_id.as_deref(), Some("POL-001"));
        // Unrecognized keys land in the extra bag.
        assert_eq!(
            meta.extra.get("review_cycle"),
            Some(&Value::String("quarterly".to_string()))
        );
        assert!(!documents[0].content.contains("---\ntitle"));
        Ok(())
    }

    #[test]
    fn test_bad_front_matter_degrades_to_content() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        std::fs::write(
            kb.join("policies/address_update.md"),
            "---\n[unbalanced\n---\nBody text survives the parse failure.\n",
        )?;

        let loader = DocumentLoader::new(&kb);
        let documents = loader.load_document(&kb.join("policies/address_update.md"))?;

        assert!(!documents.is_empty());
        // Corpus metadata still applies even though front-matter was dropped.
        assert_eq!(documents[0].metadata.title.as_deref(), Some("Address Update Policy"));
        Ok(())
    }

    #[test]
    fn test_load_all_documents_skips_undecodable_files() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        std::fs::write(kb.join("policies/broken.md"), [0xff, 0xfe, 0x00, 0x42])?;

        let loader = DocumentLoader::new(&kb);
        let documents = loader.load_all_documents();

        assert!(!documents.is_empty());
        assert!(
            documents
                .iter()
                .all(|doc| doc.metadata.file_name.as_deref() != Some("broken.md"))
        );
        Ok(())
    }

    #[test]
    fn test_load_document_missing_file_errors() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        let loader = DocumentLoader::new(&kb);

        let result = loader.load_document(&kb.join("policies/nope.md"));
        assert!(matches!(result, Err(RetrievalError::Load { .. })));
        Ok(())
    }

    #[test]
    fn test_load_documents_by_intent() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        let loader = DocumentLoader::new(&kb);

        let matched = loader.load_documents_by_intent("address_update");
        assert!(!matched.is_empty());
        assert!(
            matched
                .iter()
                .all(|doc| doc.metadata.intents.contains(&"ADDRESS_UPDATE".to_string()))
        );

        let general = loader.load_documents_by_intent("GENERAL_INQUIRY");
        assert!(
            general
                .iter()
                .all(|doc| doc.metadata.document_id.as_deref() == Some("FAQ-001"))
        );

        assert!(loader.load_documents_by_intent("CARD_DISPUTE").is_empty());
        Ok(())
    }

    #[test]
    fn test_statistics() -> Result<()> {
        let (_temp, kb) = sample_knowledge_base()?;
        let loader = DocumentLoader::new(&kb);

        let stats = loader.statistics();
        assert!(stats.total_chunks > 0);
        assert!(stats.total_characters > 0);
        assert!(stats.avg_chunk_size > 0);
        assert!(stats.unique_intents.contains(&"ADDRESS_UPDATE".to_string()));
        assert_eq!(stats.document_types.get("policy"), Some(&1));
        assert_eq!(stats.document_types.get("faq"), Some(&1));
        Ok(())
    }

    #[test]
    fn test_missing_corpus_metadata_is_not_an_error() -> Result<()> {
        let temp = tempdir()?;
        let kb = temp.path().join("kb");
        std::fs::create_dir_all(kb.join("policies"))?;
        std::fs::write(kb.join("policies/plain.md"), "Plain document, no metadata.\n")?;

        let loader = DocumentLoader::new(&kb);
        let documents = loader.load_all_documents();

        assert_eq!(documents.len(), 1);
        assert!(documents[0].metadata.document_id.is_none());
        assert!(documents[0].metadata.intents.is_empty());
        Ok(())
    }

    #[test]
    fn test_metadata_get_covers_known_and_extra_keys() {
        let mut metadata = ChunkMetadata {
            document_id: Some("POL-9".to_string()),
            intents: vec!["DISPUTE".to_string()],
            chunk_index: 2,
            ..Default::default()
        };
        metadata
            .extra
            .insert("region".to_string(), Value::String("emea".to_string()));

        assert_eq!(metadata.get("document_id"), Some(Value::from("POL-9")));
        assert_eq!(metadata.get("chunk_index"), Some(Value::from(2)));
        assert_eq!(metadata.get("region"), Some(Value::from("emea")));
        assert_eq!(metadata.get("title"), None);
        assert_eq!(metadata.get("unheard_of"), None);
    }
}
