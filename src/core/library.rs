use super::config::Config;
use super::error::{Error, Result};
use crate::indexing::indexer::{Indexer, IndexerState, ReindexOutcome};
use crate::search::access::ImageAccessGuard;
use crate::search::engine::{SearchEngine, SearchQuery, SearchResult};
use crate::search::model::EmbeddingProvider;
use crate::storage::index::IndexStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Index status as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryStats {
    pub indexed: bool,
    pub total_images: usize,
    pub library_path: String,
}

/// Everything a running photo-search instance needs, built once at start-up.
///
/// Without an embedding provider the library still answers status and image
/// requests, but searching and indexing fail with `NotInitialized`.
pub struct PhotoLibrary {
    config: Config,
    store: Arc<IndexStore>,
    indexer: Option<Indexer>,
    engine: Option<SearchEngine>,
    guard: ImageAccessGuard,
    ready: Arc<AtomicBool>,
}

impl PhotoLibrary {
    pub fn open(config: Config, provider: Option<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        config.init()?;
        let store = Arc::new(IndexStore::open(&config)?);
        let ready = Arc::new(AtomicBool::new(false));

        let (indexer, engine) = match provider {
            Some(provider) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(config.embed_threads)
                    .thread_name(|i| format!("embed-{}", i))
                    .build()
                    .map_err(|e| Error::Unexpected(format!("Failed to build embedding pool: {}", e)))?;
                let pool = Arc::new(pool);

                let indexer = Indexer::new(
                    store.clone(),
                    provider.clone(),
                    pool,
                    config.library_root.clone(),
                );
                let engine = SearchEngine::new(store.clone(), provider, ready.clone());
                (Some(indexer), Some(engine))
            }
            None => {
                warn!("No embedding model available; search and indexing are disabled");
                (None, None)
            }
        };

        let guard = ImageAccessGuard::new(
            store.clone(),
            config.library_root.clone(),
            config.sample_root.clone(),
        );

        Ok(Self {
            config,
            store,
            indexer,
            engine,
            guard,
            ready,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Blocking start-up rebuild, after which searches are accepted.
    ///
    /// Readiness is set even when the rebuild aborts, since an earlier index
    /// may still be searchable.
    pub fn start(&self) -> Result<ReindexOutcome> {
        info!("Starting up: reindexing photos to ensure the latest library is indexed...");
        let outcome = self.reindex();
        self.mark_ready();
        outcome
    }

    /// Accept searches against whatever index is currently stored
    pub fn mark_ready(&self) {
        if self.indexer.is_some() {
            self.ready.store(true, Ordering::Release);
            info!("Ready for search traffic");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current phase of the indexer, `None` without a provider
    pub fn indexer_state(&self) -> Option<IndexerState> {
        self.indexer.as_ref().map(Indexer::state)
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>> {
        self.engine.as_ref().ok_or(Error::NotInitialized)?.search(query)
    }

    /// Force rebuild
    pub fn reindex(&self) -> Result<ReindexOutcome> {
        self.indexer.as_ref().ok_or(Error::NotInitialized)?.force_rebuild()
    }

    pub fn reindex_if_drifted(&self) -> Result<ReindexOutcome> {
        self.indexer
            .as_ref()
            .ok_or(Error::NotInitialized)?
            .rebuild_if_drifted()
    }

    pub fn stats(&self) -> Result<LibraryStats> {
        match self.store.load_metadata() {
            Ok(metadata) => Ok(LibraryStats {
                indexed: true,
                total_images: metadata.total_images,
                library_path: metadata.library_root,
            }),
            Err(Error::IndexMissing) => Ok(LibraryStats {
                indexed: false,
                total_images: 0,
                library_path: self.config.library_root.to_string_lossy().into_owned(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Validate a requested image path, see [`ImageAccessGuard::resolve`]
    pub fn resolve_image(&self, requested: &str) -> Result<PathBuf> {
        self.guard.resolve(requested)
    }
}
