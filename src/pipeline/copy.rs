// Verified file copies for archive backups and pass-through outputs

use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::TEMP_FILE_PREFIX;
use crate::error::{MediaFlowError, Result};
use crate::hash::compute_file_hash;

/// Generate a unique path by appending a number
pub fn generate_unique_path(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    for i in 1..1000 {
        let new_name = if ext.is_empty() {
            format!("{}_{}", stem, i)
        } else {
            format!("{}_{}.{}", stem, i, ext)
        };
        let new_path = parent.join(new_name);
        if !new_path.exists() {
            return Ok(new_path);
        }
    }

    Err(MediaFlowError::Other("Could not generate unique filename".to_string()))
}

/// Temp sibling of `dest`; a crash mid-copy never leaves a file at the final path.
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    dest.with_file_name(format!("{}{}", TEMP_FILE_PREFIX, name))
}

/// Copy `source` to `dest` through a temp file, verify the bytes by hash,
/// then rename into place. Returns the content hash.
pub fn copy_with_verify(source: &Path, dest: &Path) -> Result<String> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_path_for(dest);
    fs::copy(source, &tmp)?;

    let source_hash = compute_file_hash(source)?;
    let copy_hash = match compute_file_hash(&tmp) {
        Ok(h) => h,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };

    if source_hash != copy_hash {
        let _ = fs::remove_file(&tmp);
        return Err(MediaFlowError::Other(format!(
            "Verification failed copying {}: hash mismatch",
            source.display()
        )));
    }

    // Preserve modification time
    if let Ok(modified) = fs::metadata(source).and_then(|m| m.modified()) {
        let _ = filetime::set_file_mtime(&tmp, filetime::FileTime::from_system_time(modified));
    }

    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(MediaFlowError::Io(e));
    }

    Ok(source_hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_with_verify_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("IMG_1.jpg");
        fs::write(&source, b"jpeg bytes").unwrap();
        let dest = tmp.path().join("archive").join("IMG_1.jpg");

        let hash = copy_with_verify(&source, &dest).unwrap();
        assert_eq!(hash, compute_file_hash(&dest).unwrap());

        for entry in fs::read_dir(dest.parent().unwrap()).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with(TEMP_FILE_PREFIX), "leftover temp file {}", name);
        }
    }

    #[test]
    fn test_copy_preserves_mtime() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("old.mov");
        fs::write(&source, b"video").unwrap();
        let past = filetime::FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(&source, past).unwrap();

        let dest = tmp.path().join("out").join("old.mov");
        copy_with_verify(&source, &dest).unwrap();

        let meta = fs::metadata(&dest).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&meta), past);
    }

    #[test]
    fn test_unique_path_appends_counter() {
        let tmp = TempDir::new().unwrap();
        let taken = tmp.path().join("a.jpg");
        fs::write(&taken, b"x").unwrap();
        assert_eq!(generate_unique_path(&taken).unwrap(), tmp.path().join("a_1.jpg"));
    }

    #[test]
    fn test_missing_source_is_error() {
        let tmp = TempDir::new().unwrap();
        let result = copy_with_verify(&tmp.path().join("nope.jpg"), &tmp.path().join("dest.jpg"));
        assert!(result.is_err());
    }
}
