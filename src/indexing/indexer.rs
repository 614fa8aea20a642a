use crate::core::error::{Error, Result};
use crate::indexing::discovery::scan_images;
use crate::search::model::EmbeddingProvider;
use crate::storage::index::{IndexMetadata, IndexStore};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Phase of the reindex state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerState {
    Idle,
    Scanning,
    Diffing,
    Embedding,
    Persisting,
}

impl fmt::Display for IndexerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexerState::Idle => "idle",
            IndexerState::Scanning => "scanning",
            IndexerState::Diffing => "diffing",
            IndexerState::Embedding => "embedding",
            IndexerState::Persisting => "persisting",
        };
        f.write_str(s)
    }
}

/// Result of embedding a single file
#[derive(Debug, Clone, PartialEq)]
pub enum EmbedOutcome {
    Embedded(Vec<f32>),
    Skipped(String),
}

/// A file left out of the index and why
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Summary of a completed rebuild
#[derive(Debug, Clone, PartialEq)]
pub struct ReindexReport {
    pub scanned: usize,
    pub indexed: usize,
    pub embedding_dim: usize,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReindexOutcome {
    /// A new index was published
    Rebuilt(ReindexReport),
    /// Drift check found nothing to do; the stored index was not touched
    Unchanged,
    /// No file could be embedded; nothing was persisted and any previous index remains
    Aborted {
        scanned: usize,
        skipped: Vec<SkippedFile>,
    },
}

/// Difference between the library on disk and the stored index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drift {
    /// Discoverable files that are not indexed
    pub new: Vec<String>,
    /// Indexed files that no longer exist
    pub stale: Vec<String>,
}

impl Drift {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.stale.is_empty()
    }
}

/// Compute drift between the currently discoverable files and the stored paths.
pub fn compute_drift(current: &[String], indexed: &[String]) -> Drift {
    let indexed_set: HashSet<&str> = indexed.iter().map(String::as_str).collect();

    let new = current
        .iter()
        .filter(|p| !indexed_set.contains(p.as_str()))
        .cloned()
        .collect();

    let mut seen = HashSet::new();
    let stale = indexed
        .iter()
        .filter(|p| seen.insert(p.as_str()) && !Path::new(p.as_str()).exists())
        .cloned()
        .collect();

    Drift { new, stale }
}

/// Orchestrates scan → diff → embed → persist.
///
/// Only one reindex runs at a time; a second caller blocks on the operation
/// lock until the first has published (or aborted).
pub struct Indexer {
    store: Arc<IndexStore>,
    provider: Arc<dyn EmbeddingProvider>,
    pool: Arc<ThreadPool>,
    library_root: PathBuf,
    op_lock: Mutex<()>,
    state: Mutex<IndexerState>,
}

impl Indexer {
    pub fn new(
        store: Arc<IndexStore>,
        provider: Arc<dyn EmbeddingProvider>,
        pool: Arc<ThreadPool>,
        library_root: PathBuf,
    ) -> Self {
        Self {
            store,
            provider,
            pool,
            library_root,
            op_lock: Mutex::new(()),
            state: Mutex::new(IndexerState::Idle),
        }
    }

    /// Current phase
    pub fn state(&self) -> IndexerState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(IndexerState::Idle)
    }

    /// Scan the whole library, embed every image and publish a new index.
    pub fn force_rebuild(&self) -> Result<ReindexOutcome> {
        let _op = self.lock_operation()?;
        let phase = PhaseGuard::new(&self.state);
        let files = self.scan(&phase);
        self.rebuild(files, &phase)
    }

    /// Rebuild only when the library differs from the stored index.
    ///
    /// A missing or inconsistent index, new files, vanished files or a
    /// different embedding model all lead to a full rebuild; otherwise
    /// nothing is written.
    pub fn rebuild_if_drifted(&self) -> Result<ReindexOutcome> {
        let _op = self.lock_operation()?;
        let phase = PhaseGuard::new(&self.state);
        let files = self.scan(&phase);

        phase.enter(IndexerState::Diffing);
        let snapshot = match self.store.load() {
            Ok(snapshot) => snapshot,
            Err(Error::IndexMissing) => {
                info!("No existing index, building from scratch");
                return self.rebuild(files, &phase);
            }
            Err(e @ Error::IndexInconsistent { .. }) => {
                warn!("{}", e);
                return self.rebuild(files, &phase);
            }
            Err(e) => return Err(e),
        };

        if snapshot.metadata.model_id.as_deref() != Some(self.provider.model_id()) {
            info!(
                "Embedding model changed ({:?} -> {}), reindexing",
                snapshot.metadata.model_id,
                self.provider.model_id()
            );
            return self.rebuild(files, &phase);
        }

        let current: Vec<String> = files.iter().map(|(p, _)| p.clone()).collect();
        let drift = compute_drift(&current, &snapshot.paths);

        if drift.is_empty() {
            info!("Using existing index (no changes detected)");
            return Ok(ReindexOutcome::Unchanged);
        }

        info!(
            "Detected changes: {} new images, {} removed. Reindexing to update index...",
            drift.new.len(),
            drift.stale.len()
        );
        self.rebuild(files, &phase)
    }

    fn lock_operation(&self) -> Result<MutexGuard<'_, ()>> {
        self.op_lock
            .lock()
            .map_err(|e| Error::Unexpected(format!("Reindex lock poisoned: {}", e)))
    }

    /// Scan the library. Paths that are not valid UTF-8 cannot be stored and are dropped here.
    fn scan(&self, phase: &PhaseGuard<'_>) -> Vec<(String, PathBuf)> {
        phase.enter(IndexerState::Scanning);

        let root = self
            .library_root
            .canonicalize()
            .unwrap_or_else(|_| self.library_root.clone());
        info!("Indexing images from: {}", root.display());

        let files: Vec<(String, PathBuf)> = scan_images(&root)
            .into_iter()
            .filter_map(|path| match path.to_str() {
                Some(s) => Some((s.to_string(), path.clone())),
                None => {
                    warn!("Skipping file with invalid UTF-8 path: {}", path.display());
                    None
                }
            })
            .collect();

        info!("Found {} images", files.len());
        files
    }

    fn rebuild(&self, files: Vec<(String, PathBuf)>, phase: &PhaseGuard<'_>) -> Result<ReindexOutcome> {
        phase.enter(IndexerState::Embedding);
        let scanned = files.len();
        let outcomes = self.embed_all(&files);

        let mut vectors = Vec::with_capacity(scanned);
        let mut paths = Vec::with_capacity(scanned);
        let mut skipped = Vec::new();
        for ((path, _), outcome) in files.into_iter().zip(outcomes) {
            match outcome {
                EmbedOutcome::Embedded(vector) => {
                    vectors.push(vector);
                    paths.push(path);
                }
                EmbedOutcome::Skipped(reason) => {
                    warn!("Error processing {}: {}", path, reason);
                    skipped.push(SkippedFile { path, reason });
                }
            }
        }

        if vectors.is_empty() {
            warn!("No valid embeddings generated, keeping the previous index");
            return Ok(ReindexOutcome::Aborted { scanned, skipped });
        }

        let embedding_dim = vectors[0].len();
        if let Some(pos) = vectors.iter().position(|v| v.len() != embedding_dim) {
            return Err(Error::Model(format!(
                "Embedding provider returned {} dimensions for {}, expected {}",
                vectors[pos].len(),
                paths[pos],
                embedding_dim
            )));
        }

        phase.enter(IndexerState::Persisting);
        let metadata = IndexMetadata {
            total_images: paths.len(),
            library_root: self.library_root.to_string_lossy().into_owned(),
            embedding_dim,
            model_id: Some(self.provider.model_id().to_string()),
            indexed_at: SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .ok()
                .map(|d| d.as_secs()),
        };
        self.store.save(&vectors, &paths, &metadata)?;

        info!("Indexed {} images successfully!", paths.len());
        Ok(ReindexOutcome::Rebuilt(ReindexReport {
            scanned,
            indexed: paths.len(),
            embedding_dim,
            skipped,
        }))
    }

    /// Embed every file on the embedding pool, keeping scan order.
    fn embed_all(&self, files: &[(String, PathBuf)]) -> Vec<EmbedOutcome> {
        let total = files.len();
        self.pool.install(|| {
            files
                .par_iter()
                .enumerate()
                .map(|(i, (_, path))| {
                    if i % 10 == 0 {
                        info!("Processing {}/{}...", i + 1, total);
                    }
                    self.embed_file(path)
                })
                .collect()
        })
    }

    fn embed_file(&self, path: &Path) -> EmbedOutcome {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => return EmbedOutcome::Skipped(format!("unreadable: {}", e)),
        };

        match self.provider.embed_image(&bytes) {
            Ok(vector) => {
                debug!("Embedded {}", path.display());
                EmbedOutcome::Embedded(vector)
            }
            Err(e) => EmbedOutcome::Skipped(e.to_string()),
        }
    }
}

/// Tracks the current phase and returns the machine to `Idle` on every exit path.
struct PhaseGuard<'a> {
    state: &'a Mutex<IndexerState>,
}

impl<'a> PhaseGuard<'a> {
    fn new(state: &'a Mutex<IndexerState>) -> Self {
        Self { state }
    }

    fn enter(&self, next: IndexerState) {
        if let Ok(mut s) = self.state.lock() {
            debug!("Indexer {} -> {}", *s, next);
            *s = next;
        }
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.enter(IndexerState::Idle);
    }
}
