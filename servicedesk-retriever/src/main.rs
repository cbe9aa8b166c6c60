use clap::{Parser, Subcommand};
use serde::Serialize;
use servicedesk_embed::{EmbeddingCache, HttpEmbeddingProvider};
use servicedesk_retriever::{
    DocumentLoader, EngineConfig, Retriever, RetrievalError, VectorIndex, embed_documents,
    retriever::DEFAULT_CONTEXT_LENGTH,
};
use std::path::PathBuf;
use std::process;
use std::sync::{Arc, RwLock};

/// A CLI tool to build and query the servicedesk knowledge-base index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (TOML); built-in defaults apply if omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load the knowledge base, embed it, and persist the vector index
    Build,
    /// Query the persisted index
    Search {
        /// Query text
        query: String,
        /// Intent tag used for filtering and boosting
        #[arg(short, long)]
        intent: Option<String>,
        /// Override the configured top-k
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
    /// Show loader, index, and cache statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "summary")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => EngineConfig::from_path(path)?,
        None => EngineConfig::default(),
    };

    match args.command {
        Commands::Build => build(&config).await,
        Commands::Search {
            query,
            intent,
            top_k,
            format,
        } => search(&config, &query, intent.as_deref(), top_k, format).await,
        Commands::Stats { format } => stats(&config, format),
    }
}

async fn open_cache(config: &EngineConfig) -> anyhow::Result<EmbeddingCache> {
    let provider = Arc::new(HttpEmbeddingProvider::new(
        config.embedding.provider_config()?,
    )?);
    Ok(EmbeddingCache::new(provider, &config.cache_dir).await?)
}

async fn build(config: &EngineConfig) -> anyhow::Result<()> {
    let loader = DocumentLoader::with_chunking(
        &config.knowledge_base,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );

    println!(
        "Loading documents from {}...",
        config.knowledge_base.display()
    );
    let documents = loader.load_all_documents();
    if documents.is_empty() {
        anyhow::bail!(
            "no documents found under {}",
            config.knowledge_base.display()
        );
    }
    let loader_stats = loader.statistics();
    println!(
        "  {} chunks, {} characters (avg {} per chunk)",
        loader_stats.total_chunks, loader_stats.total_characters, loader_stats.avg_chunk_size
    );
    println!("  Intents: {}", loader_stats.unique_intents.join(", "));

    println!("Generating embeddings...");
    let cache = open_cache(config).await?;
    let embeddings = embed_documents(&cache, &documents).await?;
    let cache_stats = cache.statistics().await?;
    println!(
        "  {} embeddings ({} cache hits, {} misses)",
        embeddings.len(),
        cache_stats.hits,
        cache_stats.misses
    );

    println!("Building index...");
    let mut index = VectorIndex::new(config.embedding.dimension, &config.index_dir);
    index.add_documents(documents, &embeddings)?;
    index.save(&config.index_name)?;

    let index_stats = index.statistics();
    println!(
        "Saved index '{}' to {}",
        config.index_name,
        config.index_dir.display()
    );
    println!(
        "  Vectors: {} | Dimension: {} | Size: {:.2} MB",
        index_stats.total_vectors, index_stats.dimension, index_stats.index_size_mb
    );
    Ok(())
}

async fn search(
    config: &EngineConfig,
    query: &str,
    intent: Option<&str>,
    top_k: Option<usize>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let index = VectorIndex::load(&config.index_dir, &config.index_name)?;
    let cache = Arc::new(open_cache(config).await?);
    let retriever = Retriever::with_config(
        Arc::new(RwLock::new(index)),
        cache,
        config.retrieval.clone(),
    );

    let documents = retriever.retrieve(query, intent, top_k).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }
        OutputFormat::Summary => {
            println!("Retrieved {} documents:", documents.len());
            for (i, doc) in documents.iter().enumerate() {
                println!(
                    "  [{}] {} - {} (intents: {})",
                    i + 1,
                    doc.metadata.document_id.as_deref().unwrap_or("UNKNOWN"),
                    doc.metadata.title.as_deref().unwrap_or("Untitled"),
                    doc.metadata.intents.join(", ")
                );
                println!(
                    "      {}",
                    doc.content.chars().take(100).collect::<String>()
                );
            }
        }
        OutputFormat::Full => {
            for (i, doc) in documents.iter().enumerate() {
                println!(
                    "[{}] {} - {} (chunk {}/{})",
                    i + 1,
                    doc.metadata.document_id.as_deref().unwrap_or("UNKNOWN"),
                    doc.metadata.title.as_deref().unwrap_or("Untitled"),
                    doc.metadata.chunk_index + 1,
                    doc.metadata.total_chunks
                );
                println!("{}", doc.content);
                println!("---");
            }
            println!();
            println!(
                "{}",
                retriever.format_context(&documents, DEFAULT_CONTEXT_LENGTH)
            );
        }
    }
    Ok(())
}

fn stats(config: &EngineConfig, format: OutputFormat) -> anyhow::Result<()> {
    let loader = DocumentLoader::with_chunking(
        &config.knowledge_base,
        config.chunking.chunk_size,
        config.chunking.chunk_overlap,
    );
    let loader_stats = loader.statistics();

    let index_stats = match VectorIndex::load(&config.index_dir, &config.index_name) {
        Ok(index) => Some(index.statistics()),
        Err(RetrievalError::IndexNotFound { .. }) => None,
        Err(err) => return Err(err.into()),
    };

    let cache_entries = std::fs::read_dir(&config.cache_dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
                .count()
        })
        .unwrap_or(0);

    match format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct StatsOutput {
                loader: servicedesk_retriever::LoaderStatistics,
                index: Option<servicedesk_retriever::IndexStatistics>,
                cache_entries: usize,
            }
            let output = StatsOutput {
                loader: loader_stats,
                index: index_stats,
                cache_entries,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Summary | OutputFormat::Full => {
            println!("Knowledge base:");
            println!("  Chunks: {}", loader_stats.total_chunks);
            println!("  Characters: {}", loader_stats.total_characters);
            println!("  Avg chunk size: {}", loader_stats.avg_chunk_size);
            println!("  Intents: {}", loader_stats.unique_intents.join(", "));
            for (doc_type, count) in &loader_stats.document_types {
                println!("  {doc_type}: {count}");
            }

            match index_stats {
                Some(stats) => {
                    println!("Index '{}':", config.index_name);
                    println!("  Vectors: {}", stats.total_vectors);
                    println!("  Dimension: {}", stats.dimension);
                    println!("  Unique documents: {}", stats.unique_documents);
                    println!("  Size: {:.2} MB", stats.index_size_mb);
                }
                None => println!("Index '{}': not built yet", config.index_name),
            }

            println!("Embedding cache: {cache_entries} entries");
        }
    }
    Ok(())
}
