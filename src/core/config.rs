use super::error::{Error, Result};
use std::path::PathBuf;

/// Environment variable naming the photo library to index.
pub const LIBRARY_PATH_ENV: &str = "PHOTO_LIBRARY_PATH";

/// Environment variable naming the bundled sample directory that may also be served.
pub const SAMPLE_PATH_ENV: &str = "PHOTO_SAMPLE_PATH";

const DEFAULT_LIBRARY_DIR: &str = "test_photos";

/// Configuration for photo-search
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for photo-search data
    pub base_dir: PathBuf,
    /// Directory holding the index database
    pub database_dir: PathBuf,
    /// Path to the index database file
    pub index_path: PathBuf,
    /// Directory for cached models
    pub models_dir: PathBuf,
    /// Library root scanned for images
    pub library_root: PathBuf,
    /// Secondary root allowed when serving images (bundled sample data)
    pub sample_root: PathBuf,
    /// Worker threads used for embedding
    pub embed_threads: usize,
}

impl Config {
    /// Get the default configuration directory
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))
            .map(|home| home.join(".photo-search"))
    }

    /// Create a new configuration.
    ///
    /// The library and sample roots come from `PHOTO_LIBRARY_PATH` and
    /// `PHOTO_SAMPLE_PATH`, both defaulting to `./test_photos`.
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.unwrap_or_else(|| {
            Self::default_base_dir().unwrap_or_else(|_| PathBuf::from(".photo-search"))
        });

        let cwd = std::env::current_dir()?;
        let library_root = std::env::var_os(LIBRARY_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.join(DEFAULT_LIBRARY_DIR));
        let sample_root = std::env::var_os(SAMPLE_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| cwd.join(DEFAULT_LIBRARY_DIR));

        let database_dir = base_dir.join("database");

        Ok(Self {
            index_path: database_dir.join("index.redb"),
            database_dir,
            models_dir: base_dir.join("models"),
            library_root,
            sample_root,
            embed_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            base_dir,
        })
    }

    pub fn with_library_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.library_root = root.into();
        self
    }

    pub fn with_sample_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sample_root = root.into();
        self
    }

    pub fn with_embed_threads(mut self, threads: usize) -> Self {
        self.embed_threads = threads.max(1);
        self
    }

    /// Initialize the configuration directories
    pub fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.database_dir)?;
        std::fs::create_dir_all(&self.models_dir)?;
        Ok(())
    }

    /// Check if the configuration is already initialized
    pub fn is_initialized(&self) -> bool {
        self.base_dir.exists() && self.database_dir.exists()
    }
}
