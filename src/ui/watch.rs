use crate::core::error::{Error, Result};
use crate::core::library::PhotoLibrary;
use crate::indexing::discovery::is_image_file;
use crate::indexing::indexer::ReindexOutcome;
use notify_debouncer_full::{
    new_debouncer,
    notify::{RecursiveMode, Watcher},
    DebounceEventResult, DebouncedEvent,
};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reindexes the library whenever images are added, removed or renamed
pub struct FileWatcher {
    root_path: PathBuf,
    library: Arc<PhotoLibrary>,
}

impl FileWatcher {
    pub fn new(library: Arc<PhotoLibrary>) -> Self {
        Self {
            root_path: library.config().library_root.clone(),
            library,
        }
    }

    /// Block, watching the library root until the watcher shuts down
    pub fn watch(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_path)?;

        // Catch up on anything that changed while we were not watching.
        self.sync();

        info!("Watching directory: {}", self.root_path.display());

        let (tx, rx) = mpsc::channel();
        let mut debouncer = new_debouncer(
            Duration::from_secs(2),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let _ = tx.send(events);
                }
                Err(errors) => {
                    for e in errors {
                        warn!("Watch error: {}", e);
                    }
                }
            },
        )
        .map_err(|e| Error::Io(std::io::Error::other(format!("Failed to create file watcher: {}", e))))?;

        debouncer
            .watcher()
            .watch(&self.root_path, RecursiveMode::Recursive)
            .map_err(|e| Error::Io(std::io::Error::other(format!("Failed to watch directory: {}", e))))?;

        while let Ok(events) = rx.recv() {
            if touches_images(&events) {
                self.sync();
            }
        }

        Ok(())
    }

    /// Run a drift-checked rebuild; failures are logged, the watch goes on.
    fn sync(&self) {
        match self.library.reindex_if_drifted() {
            Ok(ReindexOutcome::Rebuilt(report)) => info!(
                "Index updated: {} images ({} skipped)",
                report.indexed,
                report.skipped.len()
            ),
            Ok(ReindexOutcome::Unchanged) => {}
            Ok(ReindexOutcome::Aborted { scanned, .. }) => {
                warn!("Reindex aborted: none of {} images could be embedded", scanned)
            }
            Err(e) => warn!("Reindex failed: {}", e),
        }
    }
}

/// True if any event concerns an image path
pub fn touches_images(events: &[DebouncedEvent]) -> bool {
    events
        .iter()
        .flat_map(|event| event.paths.iter())
        .any(|path| is_image_file(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify_debouncer_full::notify::{event::CreateKind, Event, EventKind};
    use std::time::Instant;

    fn event(path: &str) -> DebouncedEvent {
        DebouncedEvent {
            event: Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from(path)),
            time: Instant::now(),
        }
    }

    #[test]
    fn test_touches_images() {
        assert!(touches_images(&[event("/photos/a.jpg")]));
        assert!(touches_images(&[event("/photos/notes.txt"), event("/photos/b.PNG")]));
        assert!(!touches_images(&[event("/photos/notes.txt")]));
        assert!(!touches_images(&[]));
    }
}
