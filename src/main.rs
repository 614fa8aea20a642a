use anyhow::Context;
use clap::Parser;
use photo_search::ui::cli::{Cli, Commands};
use photo_search::ui::server;
use photo_search::{
    ClipModel, Config, EmbeddingProvider, FileWatcher, PhotoLibrary, ReindexOutcome, SearchQuery,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = Config::new(cli.base_dir.as_deref().map(PathBuf::from))?;
    if let Some(library) = &cli.library {
        config = config.with_library_root(library);
    }

    match &cli.command {
        Commands::Index { force } => handle_index(config, *force),
        Commands::Search { query, limit, threshold } => handle_search(config, query, *limit, *threshold),
        Commands::Stats => handle_stats(config),
        Commands::Serve { addr } => handle_serve(config, addr),
        Commands::Watch => handle_watch(config),
    }
}

fn load_model(config: &Config) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let model = ClipModel::init(config).context("Failed to load the embedding model")?;
    Ok(Arc::new(model))
}

fn handle_index(config: Config, force: bool) -> anyhow::Result<()> {
    let provider = load_model(&config)?;
    let library = PhotoLibrary::open(config, Some(provider))?;

    let outcome = if force {
        library.reindex()?
    } else {
        library.reindex_if_drifted()?
    };

    match outcome {
        ReindexOutcome::Rebuilt(report) => {
            println!("Indexing complete!");
            println!("  Found: {} images", report.scanned);
            println!("  Indexed: {} images", report.indexed);
            if !report.skipped.is_empty() {
                println!("  Skipped: {} images", report.skipped.len());
                for skipped in &report.skipped {
                    println!("    ✗ {}: {}", skipped.path, skipped.reason);
                }
            }
        }
        ReindexOutcome::Unchanged => println!("Index is up to date."),
        ReindexOutcome::Aborted { scanned, .. } => {
            println!("No valid embeddings generated from {} images; index left unchanged.", scanned);
        }
    }
    Ok(())
}

fn handle_search(config: Config, query: &str, limit: usize, threshold: Option<f32>) -> anyhow::Result<()> {
    let provider = load_model(&config)?;
    let library = PhotoLibrary::open(config, Some(provider))?;
    // One-shot searches use whatever index exists; `index` keeps it current.
    library.mark_ready();

    let mut request = SearchQuery::new(query, limit);
    if let Some(threshold) = threshold {
        request = request.with_threshold(threshold);
    }

    let results = library.search(&request)?;
    println!("Found {} results for \"{}\":", results.len(), query);
    for (i, result) in results.iter().enumerate() {
        println!("{:>3}. {:.3}  {}", i + 1, result.score, result.path);
    }
    Ok(())
}

fn handle_stats(config: Config) -> anyhow::Result<()> {
    let library = PhotoLibrary::open(config, None)?;
    let stats = library.stats()?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn handle_serve(config: Config, addr: &str) -> anyhow::Result<()> {
    // A missing model leaves the service up for status and image requests.
    let provider = match load_model(&config) {
        Ok(provider) => Some(provider),
        Err(e) => {
            error!("{:#}", e);
            None
        }
    };
    let library = Arc::new(PhotoLibrary::open(config, provider)?);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server::serve(library, addr))
}

fn handle_watch(config: Config) -> anyhow::Result<()> {
    let provider = load_model(&config)?;
    let library = Arc::new(PhotoLibrary::open(config, Some(provider))?);
    library.mark_ready();

    info!("Press Ctrl+C to stop watching");
    FileWatcher::new(library).watch()?;
    Ok(())
}
