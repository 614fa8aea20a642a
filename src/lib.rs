// Core functionality
pub mod core {
    pub mod config;
    pub mod error;
    pub mod library;
}

// Data storage
pub mod storage {
    pub mod index;
}

// Indexing pipeline
pub mod indexing {
    pub mod discovery;
    pub mod indexer;
}

// Search & ML
pub mod search {
    pub mod access;
    pub mod engine;
    pub mod model;
}

// User interfaces
pub mod ui {
    pub mod cli;
    pub mod server;
    pub mod watch;
}

// Re-export commonly used types
pub use core::config::Config;
pub use core::error::{Error, Result};
pub use core::library::{LibraryStats, PhotoLibrary};
pub use indexing::discovery::{is_image_file, scan_images};
pub use indexing::indexer::{
    compute_drift, Drift, EmbedOutcome, Indexer, IndexerState, ReindexOutcome, ReindexReport,
    SkippedFile,
};
pub use search::access::ImageAccessGuard;
pub use search::engine::{rank, SearchEngine, SearchQuery, SearchResult};
pub use search::model::{l2_normalize, ClipModel, EmbeddingProvider, EMBEDDING_MODEL_ID};
pub use storage::index::{IndexMetadata, IndexSnapshot, IndexStore};
pub use ui::cli::Cli;
pub use ui::watch::FileWatcher;
