#![allow(dead_code)]

use photo_search::{l2_normalize, Config, EmbeddingProvider, Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

/// Deterministic provider: image bytes and query text are both a comma
/// separated list of floats. Anything else fails like a corrupt image.
pub struct FakeProvider {
    pub dim: usize,
}

impl FakeProvider {
    fn parse(&self, text: &str) -> Result<Vec<f32>> {
        let v = text
            .trim()
            .split(',')
            .map(|s| s.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Model(format!("cannot decode: {}", e)))?;
        if v.len() != self.dim {
            return Err(Error::Model(format!("expected {} values, got {}", self.dim, v.len())));
        }
        Ok(l2_normalize(v))
    }
}

impl EmbeddingProvider for FakeProvider {
    fn model_id(&self) -> &str {
        "fake-2d"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::Model(e.to_string()))?;
        self.parse(text)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.parse(text)
    }
}

/// Like [`FakeProvider`], but every image takes `delay` to embed
pub struct SlowProvider {
    pub inner: FakeProvider,
    pub delay: Duration,
}

impl EmbeddingProvider for SlowProvider {
    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        thread::sleep(self.delay);
        self.inner.embed_image(bytes)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed_text(text)
    }
}

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub library: PathBuf,
    pub samples: PathBuf,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().canonicalize().unwrap();
        let library = root.join("photos");
        let samples = root.join("samples");
        fs::create_dir_all(&library).unwrap();
        fs::create_dir_all(&samples).unwrap();

        let config = Config::new(Some(root.join("state")))
            .unwrap()
            .with_library_root(&library)
            .with_sample_root(&samples)
            .with_embed_threads(2);

        Self {
            temp_dir,
            library,
            samples,
            config,
        }
    }

    /// Write an "image" whose embedding is the given vector
    pub fn photo(&self, name: &str, vector: &[f32]) -> PathBuf {
        let path = self.library.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        write_vector(&path, vector);
        path
    }
}

pub fn write_vector(path: &Path, vector: &[f32]) {
    let text: Vec<String> = vector.iter().map(|x| x.to_string()).collect();
    fs::write(path, text.join(",")).unwrap();
}

/// Unit 2-d vector whose cosine similarity with [1, 0] is `s`
pub fn with_similarity(s: f32) -> Vec<f32> {
    vec![s, (1.0 - s * s).sqrt()]
}
