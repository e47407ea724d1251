use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trustvoice::chunker::ChunkerConfig;
use trustvoice::config::Settings;
use trustvoice::embedding::{Embedder, HashEmbedder};
use trustvoice::error::PipelineError;
use trustvoice::loader::load_complaints;
use trustvoice::retrieval::RetrievalService;
use trustvoice::store::{ChunkMetadata, StoreOptions, VectorStore};

#[derive(Parser)]
#[command(name = "trustvoice")]
#[command(version = "0.1")]
#[command(about = "Retrieval pipeline over consumer-complaint narratives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the complaints CSV, chunk and embed the narratives, and populate
    /// the vector store (offline batch step).
    Build {
        /// Complaints CSV; defaults to the configured data_path.
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Embed a free-text query and print the nearest complaint chunks.
    Search {
        query: String,
        /// Number of results; defaults to the configured top_k.
        #[arg(short)]
        k: Option<usize>,
    },
    /// List stored chunk ids.
    List,
    /// Print the resolved configuration.
    Config,
}

fn open_store(settings: &Settings) -> Result<VectorStore> {
    let store = VectorStore::open(&StoreOptions {
        path: PathBuf::from(&settings.store_path),
        dimensions: settings.dimensions,
        label_size: settings.label_size,
        model_id: settings.model_id.clone(),
    })?;
    Ok(store)
}

fn build_command(settings: &Settings, input: Option<PathBuf>) -> Result<()> {
    let data_path = input.unwrap_or_else(|| PathBuf::from(&settings.data_path));
    let records = load_complaints(&data_path)?;

    let chunker = ChunkerConfig::new(settings.max_chunk_len, settings.chunk_overlap)?;
    let embedder = HashEmbedder::new(settings.model_id.clone(), settings.dimensions)?;
    let mut store = open_store(settings)?;

    let mut chunk_count = 0usize;
    let mut skipped = 0usize;
    for record in &records {
        for chunk in chunker.chunk_narrative(record.id, &record.narrative) {
            let vector = embedder.embed(&chunk.text)?;
            let metadata = ChunkMetadata {
                complaint_id: record.id,
                chunk_index: chunk.index,
                char_offset: chunk.char_offset,
                company: record.company.clone(),
                product: record.product.clone(),
                issue: record.issue.clone(),
                state: record.state.clone(),
                date_received: record.date_received.clone(),
                text: chunk.text.clone(),
            };
            if store.insert(&chunk.id(), &vector, &metadata)? {
                chunk_count += 1;
            } else {
                skipped += 1;
            }
        }
    }
    store.refresh()?;

    info!(
        complaints = records.len(),
        chunks = chunk_count,
        skipped,
        total = store.len(),
        "index build complete"
    );
    println!(
        "indexed {} chunks from {} complaints ({} already present, {} total in store)",
        chunk_count,
        records.len(),
        skipped,
        store.len()
    );
    Ok(())
}

fn search_command(settings: &Settings, query: &str, k: Option<usize>) -> Result<()> {
    let embedder = HashEmbedder::new(settings.model_id.clone(), settings.dimensions)?;
    // A dimension or model mismatch fails here, before any query is served.
    let store = open_store(settings)?;
    let service = RetrievalService::new(embedder, store, settings.top_k);

    let response = match service.search(query, k) {
        Ok(response) => response,
        Err(e @ PipelineError::Unavailable(_)) => {
            eprintln!("retrieval is temporarily unavailable; please try again later");
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

fn list_command(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    for chunk_id in store.chunk_ids()? {
        println!("{chunk_id}");
    }
    Ok(())
}

fn config_command(settings: &Settings) -> Result<()> {
    settings.print_config();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();
    let settings = Settings::load().context("failed to load configuration")?;

    match args.command {
        Commands::Build { input } => build_command(&settings, input)?,
        Commands::Search { query, k } => search_command(&settings, &query, k)?,
        Commands::List => list_command(&settings)?,
        Commands::Config => config_command(&settings)?,
    }
    Ok(())
}
