use clap::{Parser, Subcommand};

/// photo-search - Find photos in a local library by describing them
#[derive(Parser, Debug)]
#[command(name = "photo-search")]
#[command(about = "A local-first natural-language search engine for photo libraries", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.photo-search)
    #[arg(long, global = true)]
    pub base_dir: Option<String>,

    /// Photo library to index (default: $PHOTO_LIBRARY_PATH or ./test_photos)
    #[arg(long, global = true)]
    pub library: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index the photo library
    Index {
        /// Rebuild even if nothing changed on disk
        #[arg(short, long)]
        force: bool,
    },
    /// Search the library with a natural-language query
    Search {
        /// What the photo shows
        query: String,
        /// Maximum number of results to return
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Minimum similarity score; the best match is still shown if none reach it
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// Show index statistics
    Stats,
    /// Start the HTTP search service
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
    },
    /// Watch the library and reindex when files are added or removed
    Watch,
}
