//! Nadhir application binary - composition root.
//!
//! Ties together all Nadhir crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open storage (SQLite) and rebuild the vector index from persisted
//!    embeddings
//! 3. Construct the embedding provider (OpenAI-compatible, key from env)
//! 4. Run the requested subcommand: `ingest` or `query`
//!
//! Output is JSON on stdout so the answer layer above can consume it.

mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use nadhir_core::config::NadhirConfig;
use nadhir_core::error::Result;
use nadhir_core::types::EntityKind;
use nadhir_ingest::{parse_feed, IngestPipeline, PipelineOptions};
use nadhir_retrieval::{RetrievalEngine, RetrievalFilters};
use nadhir_storage::{Database, EntityStore};
use nadhir_vector::{OpenAiEmbedding, VectorIndex};

use cli::{CliArgs, Command};

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if let Some(rest) = data_dir.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(data_dir)
    }
}

/// Load persisted embeddings into a fresh index.
fn rebuild_index(store: &EntityStore, config: &NadhirConfig) -> Result<Arc<VectorIndex>> {
    let index = VectorIndex::new(config.embedding.dimension);
    let mut loaded = 0;
    for kind in [
        EntityKind::Region,
        EntityKind::Governorate,
        EntityKind::Hazard,
    ] {
        for (id, vector) in store.load_embeddings(kind)? {
            index.upsert(kind, &id, vector)?;
            loaded += 1;
        }
    }
    tracing::info!(loaded, "Vector index rebuilt from storage");
    Ok(Arc::new(index))
}

async fn run_ingest(
    store: Arc<EntityStore>,
    index: Arc<VectorIndex>,
    config: &NadhirConfig,
    feed_path: PathBuf,
) -> Result<()> {
    tracing::info!(path = %feed_path.display(), "Reading feed snapshot");
    let raw = std::fs::read_to_string(&feed_path)?;
    let document: serde_json::Value = serde_json::from_str(&raw)?;
    let parsed = parse_feed(&document)?;
    tracing::info!(
        records = parsed.records.len(),
        malformed = parsed.malformed.len(),
        "Feed parsed"
    );

    let provider = OpenAiEmbedding::from_env(&config.embedding)?;
    let pipeline = IngestPipeline::new(store, index, provider, PipelineOptions::from_config(config));
    let report = pipeline.run(&parsed.records).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn run_query(
    store: Arc<EntityStore>,
    index: Arc<VectorIndex>,
    config: &NadhirConfig,
    text: String,
    k: Option<usize>,
    region: Option<String>,
) -> Result<()> {
    let provider = OpenAiEmbedding::from_env(&config.embedding)?;
    let engine = RetrievalEngine::new(store, index, provider, config.retrieval.clone());

    let filters = RetrievalFilters {
        region_id: region,
        ..Default::default()
    };
    let results = engine.retrieve(&text, &filters, k.unwrap_or(0)).await?;

    for ranked in &results {
        println!("{}", serde_json::to_string(ranked)?);
    }
    tracing::info!(results = results.len(), "Query complete");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = NadhirConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. Logs go to stderr; stdout carries the JSON results.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .init();

    tracing::info!("Starting Nadhir v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("nadhir.db");
    let db = Arc::new(Database::new(&db_path)?);
    tracing::info!(path = %db_path.display(), "SQLite database opened");

    let store = Arc::new(EntityStore::new(db));
    let index = rebuild_index(&store, &config)?;

    match args.command {
        Command::Ingest { feed } => {
            let feed_path = feed.unwrap_or_else(|| data_dir.join("feed.json"));
            run_ingest(store, index, &config, feed_path).await
        }
        Command::Query { text, k, region } => {
            run_query(store, index, &config, text, k, region).await
        }
    }
}
