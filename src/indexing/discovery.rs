use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Extensions recognised as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp", "tiff", "tif"];

/// Discover all image files under `root`, recursing into subdirectories.
///
/// The result is sorted and free of duplicates. A root that does not exist
/// yields an empty list. Files are never opened.
pub fn scan_images(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }

    // Every image counts: hidden files and ignore-files are not filters here.
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    let mut files = Vec::new();
    for result in walker {
        match result {
            Ok(entry) => {
                let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
                if is_file && is_image_file(entry.path()) {
                    files.push(entry.into_path());
                }
            }
            Err(err) => {
                warn!("Failed to access entry under {}: {}", root.display(), err);
            }
        }
    }

    files.sort();
    files.dedup();
    files
}

/// Check if a file is a supported image based on extension
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}
