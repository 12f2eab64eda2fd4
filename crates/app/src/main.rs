use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_rag_core::{
    extract_page_texts, format_context, CharacterNgramEncoder, Chunker, ChunkingConfig, Embedder,
    FailurePolicy, FileSnapshotStore, HttpEncoderConfig, HttpTokenEncoder, IndexOutcome,
    IndexingPipeline, RetrievalOptions, RetrievalService, SearchQuery, SentenceEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding the persisted vector store
    #[arg(long, env = "PDF_RAG_DATA_DIR", default_value = ".pdf-rag")]
    data_dir: PathBuf,

    /// Snapshot file name inside the data directory
    #[arg(long, default_value = "vectors.vec")]
    store_file: String,

    /// Token-embedding endpoint; the offline n-gram encoder is used when unset
    #[arg(long, env = "PDF_RAG_EMBEDDING_ENDPOINT")]
    embedding_endpoint: Option<String>,

    /// Bearer token for the embedding endpoint
    #[arg(long, env = "PDF_RAG_EMBEDDING_API_KEY", hide_env_values = true)]
    embedding_api_key: Option<String>,

    /// Embedding dimensionality
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk and embed one document, replacing the persisted store.
    Index {
        /// PDF or plain-text file to index.
        #[arg(long)]
        file: PathBuf,
        /// Maximum characters per fragment.
        #[arg(long, default_value = "1024")]
        chunk_max_chars: usize,
        /// Fragments per embedding call.
        #[arg(long, default_value = "32")]
        batch_size: usize,
        /// Keep non-ASCII text instead of stripping it.
        #[arg(long, default_value_t = false)]
        preserve_unicode: bool,
        /// Drop batches the embedder fails on instead of aborting.
        #[arg(long, default_value_t = false)]
        skip_failed_batches: bool,
    },
    /// Search the persisted store and print windowed context.
    Search {
        /// Search query
        #[arg(long)]
        query: String,
        /// Number of ranked hits to expand.
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Neighbors included on each side of a hit.
        #[arg(long, default_value = "3")]
        window_radius: usize,
        /// Print deduplicated prompt context instead of raw windows.
        #[arg(long, default_value_t = false)]
        context: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    let embedder = build_embedder(&cli)?;

    match cli.command {
        Command::Index {
            file,
            chunk_max_chars,
            batch_size,
            preserve_unicode,
            skip_failed_batches,
        } => {
            let options = RetrievalOptions {
                chunk_max_chars,
                preserve_unicode,
                batch_size,
                store_file: cli.store_file.clone(),
                failure_policy: if skip_failed_batches {
                    FailurePolicy::SkipFragment
                } else {
                    FailurePolicy::Abort
                },
                ..RetrievalOptions::default()
            };
            let snapshots = Arc::new(FileSnapshotStore::with_options(&cli.data_dir, &options)?);
            run_index(&file, &options, embedder, snapshots).await?;
        }
        Command::Search {
            query,
            top_k,
            window_radius,
            context,
        } => {
            let options = RetrievalOptions {
                top_k,
                window_radius,
                store_file: cli.store_file.clone(),
                ..RetrievalOptions::default()
            };
            let snapshots = Arc::new(FileSnapshotStore::with_options(&cli.data_dir, &options)?);

            let mut pipeline = IndexingPipeline::new(embedder.clone(), snapshots, &options)?;
            let outcome = pipeline
                .initialize(None, |_| {}, &CancellationToken::new())
                .await?;

            let Some(store) = outcome.into_store() else {
                println!(
                    "no index found in {}; run `index` first",
                    cli.data_dir.display()
                );
                return Ok(());
            };

            let mut service = RetrievalService::new(embedder);
            service.attach_store(store)?;
            service.load_model().await?;

            let search_query = SearchQuery::new(query, &options);
            let fragments = service.search(&search_query).await?;

            println!("query: {}", search_query.text);
            if fragments.is_empty() {
                println!("no matching fragments");
            } else if context {
                println!("{}", format_context(&fragments));
            } else {
                for fragment in &fragments {
                    println!(
                        "[page {}] #{} {}",
                        fragment.page, fragment.position, fragment.text
                    );
                }
            }
        }
    }

    Ok(())
}

fn build_embedder(cli: &Cli) -> anyhow::Result<Arc<dyn Embedder>> {
    let dimensions = cli.dimensions;

    match &cli.embedding_endpoint {
        Some(endpoint) => {
            let config =
                HttpEncoderConfig::new(endpoint, cli.embedding_api_key.clone(), dimensions)?;
            info!(endpoint = %config.endpoint, dimensions, "using http token encoder");
            Ok(Arc::new(SentenceEmbedder::lazy(dimensions, move || {
                Ok(HttpTokenEncoder::new(config.clone()))
            })))
        }
        None => {
            info!(dimensions, "using offline n-gram encoder");
            Ok(Arc::new(SentenceEmbedder::lazy(dimensions, move || {
                Ok(CharacterNgramEncoder { dimensions })
            })))
        }
    }
}

async fn run_index(
    file: &Path,
    options: &RetrievalOptions,
    embedder: Arc<dyn Embedder>,
    snapshots: Arc<FileSnapshotStore>,
) -> anyhow::Result<()> {
    let pages = extract_page_texts(file)?;
    let chunker = Chunker::new(ChunkingConfig::from(options))?;
    let fragments = chunker.chunk_pages(&pages);
    info!(
        file = %file.display(),
        pages = pages.len(),
        fragments = fragments.len(),
        "document chunked"
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling after the current batch");
            on_interrupt.cancel();
        }
    });

    let mut pipeline = IndexingPipeline::new(embedder, snapshots, options)?;
    let outcome = pipeline
        .initialize(
            Some(fragments),
            |fraction| info!(progress = %format!("{:.1}%", fraction * 100.0), "indexing"),
            &cancel,
        )
        .await?;

    match outcome {
        IndexOutcome::Ready {
            store,
            skipped,
            persist_error,
        } => {
            if let Some(error) = persist_error {
                warn!(%error, "index built but could not be saved");
            }
            println!(
                "{} fragments indexed ({} skipped) at {}",
                store.len(),
                skipped,
                Utc::now().to_rfc3339()
            );
        }
        IndexOutcome::Empty | IndexOutcome::Loaded(_) => {
            println!("0 fragments indexed (document had no readable text)");
        }
        IndexOutcome::Cancelled => {
            println!("indexing cancelled; previous index left untouched");
        }
    }

    Ok(())
}
