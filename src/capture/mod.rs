//! Image Input Layer
//!
//! Loads still photos for scanning, either single files or whole directories
//! standing in for a photo library.

pub mod frame;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

pub use frame::ScanImage;

/// File extensions the decoder is asked to handle
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

/// Check whether a path looks like a decodable photo
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand files and directories into a sorted, de-duplicated list of image files
///
/// Directories are walked one level deep; unsupported files are skipped.
pub fn collect_image_paths(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let entries = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory {:?}", input))?;
            let mut found: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && is_supported_image(path))
                .collect();
            found.sort();
            debug!("Found {} images in {:?}", found.len(), input);
            paths.extend(found);
        } else if is_supported_image(input) {
            paths.push(input.clone());
        } else {
            debug!("Skipping unsupported file {:?}", input);
        }
    }

    let mut seen = std::collections::HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));

    Ok(paths)
}
