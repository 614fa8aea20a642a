use crate::core::error::{Error, Result};
use crate::storage::index::IndexStore;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Decides which files may be served back to clients.
///
/// Two roots are allowed: the authoritative library root and a fixed sample
/// root for bundled data. Nothing outside them is ever served.
pub struct ImageAccessGuard {
    store: Arc<IndexStore>,
    library_root: PathBuf,
    sample_root: PathBuf,
}

impl ImageAccessGuard {
    pub fn new(store: Arc<IndexStore>, library_root: PathBuf, sample_root: PathBuf) -> Self {
        Self {
            store,
            library_root,
            sample_root,
        }
    }

    /// The directory images are actually served from.
    ///
    /// This is the parent of the first indexed path, which reflects where the
    /// last build found images. Without a usable index it is the configured
    /// library root.
    ///
    /// Indexed paths are sorted as full paths, so in a nested library the
    /// first one may sit in a subdirectory (`photos/2024/a.jpg` sorts before
    /// `photos/b.jpg`). Images above that directory are then only served if
    /// the sample root covers them.
    pub fn authoritative_root(&self) -> PathBuf {
        let from_index = self.store.load_paths().ok().and_then(|paths| {
            paths
                .first()
                .and_then(|p| Path::new(p).parent())
                .map(Path::to_path_buf)
        });

        from_index.unwrap_or_else(|| self.library_root.clone())
    }

    /// Validate a (URL-encoded) requested path and return its absolute form.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf> {
        let decoded = urlencoding::decode(requested)
            .map_err(|e| Error::InvalidQuery(format!("path is not valid UTF-8: {}", e)))?;

        let image_path = resolve_path(Path::new(decoded.as_ref()))?;
        let library = resolve_path(&self.authoritative_root())?;
        let sample = resolve_path(&self.sample_root)?;

        if !image_path.starts_with(&library) && !image_path.starts_with(&sample) {
            warn!(
                "Access denied. Path: {}, Library: {}",
                image_path.display(),
                library.display()
            );
            return Err(Error::AccessDenied(image_path));
        }

        if !image_path.is_file() {
            return Err(Error::NotFound(image_path));
        }

        debug!("Serving {}", image_path.display());
        Ok(image_path)
    }
}

/// Absolute, symlink-free form of `path`, whether or not it exists.
///
/// `.` and `..` are removed lexically, then the longest existing prefix is
/// canonicalized and the remaining components are appended unchanged.
pub fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    let mut existing = normalized.clone();
    let mut rest: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for name in rest.iter().rev() {
                resolved.push(name);
            }
            return Ok(resolved);
        }
        match existing.file_name() {
            Some(name) => {
                rest.push(name.to_os_string());
                existing.pop();
            }
            None => return Ok(normalized),
        }
    }
}

/// MIME type for an image path, by extension
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        Some("tif") | Some("tiff") => "image/tiff",
        _ => "application/octet-stream",
    }
}
