//! End-to-end happy-path tests for the retrieval engine:
//! load a knowledge base, embed it through the cache, build and persist the
//! index, reload it, and serve intent-aware queries.

use anyhow::Result;
use servicedesk_embed::{EmbeddingCache, MockEmbeddingProvider};
use servicedesk_retriever::retriever::DEFAULT_CONTEXT_LENGTH;
use servicedesk_retriever::{
    DocumentLoader, Retriever, RetrieverConfig, VectorIndex, embed_documents,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tempfile::tempdir;

const DIMENSION: usize = 16;

fn write_knowledge_base(root: &Path) -> Result<PathBuf> {
    let kb = root.join("knowledge_base");
    std::fs::create_dir_all(kb.join("policies"))?;
    std::fs::create_dir_all(kb.join("faqs"))?;

    std::fs::write(
        kb.join("policies/address_update.md"),
        "# Address Update Policy\n\nCustomers may update their mailing address online, \
         by phone, or in a branch. Identity verification is required first.\n\n\
         ## Processing\n\nUpdates take effect within two business days.\n",
    )?;
    std::fs::write(
        kb.join("policies/dispute_handling.md"),
        "# Dispute Handling Policy\n\nCard disputes must be filed within 60 days of the \
         statement date. Provisional credit may be issued during investigation.\n",
    )?;
    std::fs::write(
        kb.join("faqs/general.md"),
        "# General FAQ\n\n## Q: How do I contact support?\nA: Via secure message or phone, \
         24 hours a day.\n",
    )?;

    let metadata = serde_json::json!({
        "documents": [
            {
                "id": "POL-ADDR",
                "file_path": "knowledge_base/policies/address_update.md",
                "document_type": "policy",
                "title": "Address Update Policy",
                "intents": ["ADDRESS_UPDATE"],
                "keywords": ["address", "update"],
                "version": "2.0",
                "compliance_tags": ["KYC"]
            },
            {
                "id": "POL-DISP",
                "file_path": "knowledge_base/policies/dispute_handling.md",
                "document_type": "policy",
                "title": "Dispute Handling Policy",
                "intents": ["CARD_DISPUTE"]
            },
            {
                "id": "FAQ-GEN",
                "file_path": "knowledge_base/faqs/general.md",
                "document_type": "faq",
                "title": "General FAQ",
                "intents": ["GENERAL_INQUIRY", "ADDRESS_UPDATE"]
            }
        ],
        "intent_mapping": {}
    });
    std::fs::write(kb.join("metadata.json"), serde_json::to_vec_pretty(&metadata)?)?;
    Ok(kb)
}

#[tokio::test]
async fn test_build_save_load_and_retrieve() -> Result<()> {
    let temp = tempdir()?;
    let kb = write_knowledge_base(temp.path())?;

    // Build phase: loader -> cache -> index -> save.
    let loader = DocumentLoader::new(&kb);
    let documents = loader.load_all_documents();
    assert!(documents.len() >= 3);

    let provider = Arc::new(MockEmbeddingProvider::new(DIMENSION));
    let cache = Arc::new(EmbeddingCache::new(provider.clone(), temp.path().join("cache")).await?);
    let embeddings = embed_documents(&cache, &documents).await?;
    assert_eq!(embeddings.len(), documents.len());

    let index_dir = temp.path().join("vector_index");
    let mut index = VectorIndex::new(DIMENSION, &index_dir);
    index.add_documents(documents, &embeddings)?;
    index.save("knowledge_base")?;

    // Serve phase: reload and query.
    let restored = VectorIndex::load(&index_dir, "knowledge_base")?;
    assert_eq!(restored.len(), embeddings.len());

    let config = RetrieverConfig {
        similarity_threshold: -1.0, // mock vectors are not semantic; keep everything
        ..Default::default()
    };
    let retriever = Retriever::with_config(Arc::new(RwLock::new(restored)), cache.clone(), config);

    let results = retriever
        .retrieve("how do I change my address", Some("address_update"), None)
        .await?;
    assert!(!results.is_empty());
    for doc in &results {
        assert!(doc.metadata.intents.contains(&"ADDRESS_UPDATE".to_string()));
    }

    let context = retriever.format_context(&results, DEFAULT_CONTEXT_LENGTH);
    assert!(context.starts_with("**Relevant Policy Context:**"));
    assert!(context.contains("[Document 1 - "));

    let metrics = retriever.metrics();
    assert_eq!(metrics.retrieval_count, 1);
    assert_eq!(metrics.total_results, results.len() as u64);

    Ok(())
}

#[tokio::test]
async fn test_rebuild_hits_the_embedding_cache() -> Result<()> {
    let temp = tempdir()?;
    let kb = write_knowledge_base(temp.path())?;

    let loader = DocumentLoader::new(&kb);
    let provider = Arc::new(MockEmbeddingProvider::new(DIMENSION));
    let cache = EmbeddingCache::new(provider.clone(), temp.path().join("cache")).await?;

    let documents = loader.load_all_documents();
    embed_documents(&cache, &documents).await?;
    let first_build_calls = provider.call_count();
    assert!(first_build_calls > 0);

    // Second build over an unchanged corpus: every chunk is already cached.
    let documents = loader.load_all_documents();
    embed_documents(&cache, &documents).await?;
    assert_eq!(provider.call_count(), first_build_calls);

    let stats = cache.statistics().await?;
    assert_eq!(stats.misses, first_build_calls as u64);
    assert_eq!(stats.hits, first_build_calls as u64);
    Ok(())
}

#[tokio::test]
async fn test_retrieve_with_unknown_intent_is_empty() -> Result<()> {
    let temp = tempdir()?;
    let kb = write_knowledge_base(temp.path())?;

    let loader = DocumentLoader::new(&kb);
    let documents = loader.load_all_documents();

    let provider = Arc::new(MockEmbeddingProvider::new(DIMENSION));
    let cache = Arc::new(EmbeddingCache::new(provider, temp.path().join("cache")).await?);
    let embeddings = embed_documents(&cache, &documents).await?;

    let mut index = VectorIndex::new(DIMENSION, temp.path().join("vector_index"));
    index.add_documents(documents, &embeddings)?;

    let config = RetrieverConfig {
        similarity_threshold: -1.0,
        ..Default::default()
    };
    let retriever = Retriever::with_config(Arc::new(RwLock::new(index)), cache, config);

    let results = retriever
        .retrieve("anything", Some("MORTGAGE_PAYOFF"), None)
        .await?;
    assert!(results.is_empty());

    assert_eq!(
        retriever.format_context(&results, DEFAULT_CONTEXT_LENGTH),
        "No relevant context found."
    );
    Ok(())
}
