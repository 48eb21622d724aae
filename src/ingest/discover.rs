// File discovery for ingest

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::constants::TEMP_FILE_PREFIX;
use crate::error::Result;
use crate::metadata::detect_media_type;

/// Discover all media files under the staging directory
pub fn discover_media_files(source_path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if source_path.is_file() {
        if is_media_file(source_path) {
            files.push(source_path.to_path_buf());
        }
    } else if source_path.is_dir() {
        for entry in WalkDir::new(source_path)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_file() && is_media_file(path) {
                files.push(path.to_path_buf());
            }
        }
    }

    // Sort by path for consistent ordering
    files.sort();

    Ok(files)
}

/// Check if a file is a media file based on extension
pub fn is_media_file(path: &Path) -> bool {
    !is_hidden(path) && detect_media_type(path).is_some()
}

/// Dotfiles, including our own in-flight temp copies and macOS "._" forks.
fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || n.starts_with(TEMP_FILE_PREFIX))
        .unwrap_or(false)
}
