// Ingest: register new files from the staging directory as pending records

pub mod discover;

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::BYTES_PER_MB;
use crate::db::schema::{LogLevel, NewMediaFile};
use crate::error::{MediaFlowError, Result};
use crate::hash::compute_file_hash;
use crate::metadata::{detect_media_type, exiftool, extract_metadata};
use crate::settings::Settings;
use crate::store::FileRecordStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub total_files: usize,
    pub inserted: usize,
    /// New paths whose content matches a file already queued.
    pub duplicates: usize,
    /// Paths registered by an earlier scan; skipped without hashing.
    pub already_known: usize,
    pub failed: usize,
}

/// Scan `stagingDir` and queue every file whose content hash is new.
pub fn ingest_staging<S: FileRecordStore + ?Sized>(store: &S, settings: &Settings) -> Result<IngestResult> {
    let use_exiftool = exiftool::is_available();
    if !use_exiftool {
        log::warn!("exiftool not found; capture dates fall back to folder names and file times");
    }
    ingest_dir(store, &settings.staging_path(), use_exiftool)
}

pub(crate) fn ingest_dir<S: FileRecordStore + ?Sized>(
    store: &S,
    staging_dir: &Path,
    use_exiftool: bool,
) -> Result<IngestResult> {
    let files = discover::discover_media_files(staging_dir)?;
    let mut result = IngestResult { total_files: files.len(), ..Default::default() };

    log::info!("Found {} media files in {}", files.len(), staging_dir.display());

    for path in &files {
        if store.is_known_path(&path.to_string_lossy())? {
            result.already_known += 1;
            continue;
        }

        let new_file = match describe_file(path, use_exiftool) {
            Ok(f) => f,
            Err(e) => {
                // One unreadable file never aborts the scan
                result.failed += 1;
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        match store.insert_if_new(&new_file)? {
            Some(id) => {
                result.inserted += 1;
                store.append_log(
                    Some(id),
                    LogLevel::Info,
                    &format!("Queued {} ({:.2} MB, {})", new_file.file_name, new_file.original_size_mb, new_file.media_type),
                )?;
            }
            None => {
                result.duplicates += 1;
                log::debug!("Duplicate content, skipping {}", path.display());
            }
        }
    }

    if result.duplicates > 0 {
        store.append_log(
            None,
            LogLevel::Info,
            &format!("Ingest skipped {} duplicate files", result.duplicates),
        )?;
    }

    log::info!(
        "Ingest complete: {} new, {} duplicates, {} already known, {} failed",
        result.inserted,
        result.duplicates,
        result.already_known,
        result.failed
    );

    Ok(result)
}

fn describe_file(path: &Path, use_exiftool: bool) -> Result<NewMediaFile> {
    let media_type = detect_media_type(path)
        .ok_or_else(|| MediaFlowError::Other(format!("Unsupported file type: {}", path.display())))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| MediaFlowError::FileNotFound(path.display().to_string()))?;

    let size_bytes = fs::metadata(path)?.len() as f64;
    let file_hash = compute_file_hash(path)?;
    let meta = extract_metadata(path, use_exiftool);

    Ok(NewMediaFile {
        file_hash,
        file_name,
        media_type,
        original_size_mb: (size_bytes / BYTES_PER_MB * 100.0).round() / 100.0,
        camera: Some(meta.camera),
        created_date: meta.created_date,
        staging_path: path.to_string_lossy().to_string(),
    })
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
