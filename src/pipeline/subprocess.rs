// Real stage implementations backed by external tools and the filesystem
//
// Compression: ffmpeg (video) and ImageMagick `convert` (images), output in
// processedDir. NAS backup: verified copy into the archive mount.
// Uploads: rclone to the configured remotes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use chrono::format::{Item, StrftimeItems};

use super::copy::{copy_with_verify, generate_unique_path, temp_path_for};
use super::{Ack, CloudUploader, CompressOutput, Compressor, FileRef, ICloudUploader, NasBackup};
use crate::constants::BYTES_PER_MB;
use crate::db::schema::{parse_timestamp, MediaType};
use crate::error::{MediaFlowError, Result};
use crate::hash::{compute_file_hash, verify_hash};
use crate::policy::CompressionTier;
use crate::tools::{self, last_stderr_line, run_with_timeout};

fn size_mb(path: &Path) -> std::io::Result<f64> {
    let bytes = fs::metadata(path)?.len() as f64;
    Ok((bytes / BYTES_PER_MB * 100.0).round() / 100.0)
}

/// Run a tool; any spawn failure, timeout or non-zero exit becomes `wrap(reason)`.
fn run_tool(
    name: &str,
    cmd: &mut Command,
    timeout: Option<Duration>,
    wrap: fn(String) -> MediaFlowError,
) -> Result<()> {
    let output = run_with_timeout(cmd, timeout).map_err(|e| wrap(format!("{} {}", name, e)))?;
    if !output.status.success() {
        return Err(wrap(format!(
            "{} exited with code {}: {}",
            name,
            output.status.code().unwrap_or(-1),
            last_stderr_line(&output.stderr)
        )));
    }
    Ok(())
}

// ----- Compression -----

pub struct FfmpegCompressor {
    processed_dir: PathBuf,
    preserve_exif: bool,
    timeout: Option<Duration>,
}

impl FfmpegCompressor {
    pub fn new(processed_dir: PathBuf, preserve_exif: bool, timeout: Option<Duration>) -> Self {
        Self { processed_dir, preserve_exif, timeout }
    }

    /// processedDir/<stem>_<id>.<ext>; the id keeps same-named files from different cameras apart.
    fn output_path(&self, file: &FileRef, ext: &str) -> PathBuf {
        let stem = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        self.processed_dir.join(format!("{}_{}.{}", stem, file.id, ext))
    }

    fn compress_video(&self, file: &FileRef, tier: &CompressionTier) -> Result<PathBuf> {
        let output = self.output_path(file, "mp4");
        let tmp = temp_path_for(&output);

        let mut cmd = Command::new(tools::ffmpeg_path());
        cmd.args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(&file.path)
            .arg("-vf")
            .arg(format!("scale=-2:'min(ih,{})'", tier.max_height))
            .args(["-c:v", "libx264", "-preset", "medium", "-crf"])
            .arg(tier.video_crf.to_string())
            .args(["-c:a", "aac", "-b:a", "128k", "-movflags", "+faststart"]);
        if self.preserve_exif {
            cmd.args(["-map_metadata", "0"]);
        }
        cmd.arg(&tmp);

        if let Err(e) = run_tool("ffmpeg", &mut cmd, self.timeout, MediaFlowError::Compression) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &output).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            MediaFlowError::Compression(format!("Failed to move output into place: {}", e))
        })?;
        Ok(output)
    }

    fn compress_image(&self, file: &FileRef, tier: &CompressionTier) -> Result<PathBuf> {
        let quality = match tier.jpg_quality {
            Some(q) => q,
            None => {
                // Newest tier keeps the original bytes
                let ext = file
                    .path
                    .extension()
                    .map(|e| e.to_string_lossy().to_lowercase())
                    .unwrap_or_else(|| "jpg".to_string());
                let output = self.output_path(file, &ext);
                copy_with_verify(&file.path, &output)
                    .map_err(|e| MediaFlowError::Compression(format!("Pass-through copy failed: {}", e)))?;
                return Ok(output);
            }
        };

        let output = self.output_path(file, "jpg");
        let tmp = temp_path_for(&output);

        let mut cmd = Command::new(tools::convert_path());
        cmd.arg(&file.path)
            .arg("-auto-orient")
            .arg("-resize")
            .arg(format!("x{}>", tier.max_height))
            .arg("-quality")
            .arg(quality.to_string());
        if !self.preserve_exif {
            cmd.arg("-strip");
        }
        cmd.arg(&tmp);

        if let Err(e) = run_tool("convert", &mut cmd, self.timeout, MediaFlowError::Compression) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &output).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            MediaFlowError::Compression(format!("Failed to move output into place: {}", e))
        })?;
        Ok(output)
    }
}

impl Compressor for FfmpegCompressor {
    fn compress(&self, file: &FileRef, tier: &CompressionTier) -> Result<CompressOutput> {
        if !file.path.is_file() {
            return Err(MediaFlowError::Compression(format!(
                "Source file missing: {}",
                file.path.display()
            )));
        }

        fs::create_dir_all(&self.processed_dir).map_err(|e| {
            MediaFlowError::Compression(format!(
                "Cannot create {}: {}",
                self.processed_dir.display(),
                e
            ))
        })?;

        let output = match file.media_type {
            MediaType::Video => self.compress_video(file, tier)?,
            MediaType::Image => self.compress_image(file, tier)?,
        };

        let size_mb = size_mb(&output)
            .map_err(|e| MediaFlowError::Compression(format!("Cannot stat output: {}", e)))?;

        log::debug!(
            "Compressed {} at tier {} to {:.2} MB",
            file.file_name,
            tier.level.as_str(),
            size_mb
        );

        Ok(CompressOutput { size_mb, output_path: Some(output) })
    }
}

// ----- NAS backup -----

/// Copies originals into the archive directory (a mounted NAS share).
pub struct NasCopyBackup;

impl NasCopyBackup {
    pub fn new() -> Self {
        NasCopyBackup
    }

    fn copy_into(&self, file: &FileRef, destination: &Path) -> Result<PathBuf> {
        if !file.path.is_file() {
            return Err(MediaFlowError::FileNotFound(file.path.to_string_lossy().to_string()));
        }

        let mut dest = destination.join(&file.file_name);
        if dest.exists() {
            // Already archived by an earlier attempt
            let source_hash = compute_file_hash(&file.path)?;
            if verify_hash(&dest, &source_hash)? {
                return Ok(dest);
            }
            dest = generate_unique_path(&dest)?;
        }

        copy_with_verify(&file.path, &dest)?;
        Ok(dest)
    }
}

impl Default for NasCopyBackup {
    fn default() -> Self {
        Self::new()
    }
}

impl NasBackup for NasCopyBackup {
    fn backup(&self, file: &FileRef, destination: &Path) -> Result<Ack> {
        let dest = self
            .copy_into(file, destination)
            .map_err(|e| MediaFlowError::Backup(format!("NAS copy to {} failed: {}", destination.display(), e)))?;
        Ok(Ack { location: Some(dest.to_string_lossy().to_string()) })
    }
}

// ----- Uploads -----

fn rclone_copy(file: &FileRef, destination: &str, timeout: Option<Duration>) -> Result<Ack> {
    if !file.path.is_file() {
        return Err(MediaFlowError::Upload(format!(
            "Nothing to upload, {} is missing",
            file.path.display()
        )));
    }

    let mut cmd = Command::new(tools::rclone_path());
    cmd.arg("copy").arg(&file.path).arg(destination);
    run_tool("rclone", &mut cmd, timeout, MediaFlowError::Upload)?;

    Ok(Ack {
        location: Some(format!("{}/{}", destination.trim_end_matches('/'), file.file_name)),
    })
}

pub struct RcloneUploader {
    timeout: Option<Duration>,
}

impl RcloneUploader {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CloudUploader for RcloneUploader {
    fn upload(&self, file: &FileRef, destination: &str) -> Result<Ack> {
        rclone_copy(file, destination, self.timeout)
    }
}

/// Uploads to an rclone iCloud Drive remote, foldered by the file's creation date.
pub struct ICloudRcloneUploader {
    remote: String,
    folder_structure: String,
    timeout: Option<Duration>,
}

impl ICloudRcloneUploader {
    pub fn new(remote: String, folder_structure: String, timeout: Option<Duration>) -> Self {
        Self { remote, folder_structure, timeout }
    }
}

impl ICloudUploader for ICloudRcloneUploader {
    fn upload(&self, file: &FileRef) -> Result<Ack> {
        let folder = expand_folder_structure(&self.folder_structure, &file.created_date);
        let destination = format!("{}:{}", self.remote, folder);
        rclone_copy(file, &destination, self.timeout)
    }
}

/// Expand an icloudpd-style folder template such as "{:%Y/%m}" using the
/// file's creation date. Templates that cannot be expanded yield "".
pub fn expand_folder_structure(structure: &str, created_date: &str) -> String {
    let (start, end) = match (structure.find("{:"), structure.rfind('}')) {
        (Some(s), Some(e)) if e > s => (s, e),
        _ => return structure.to_string(),
    };

    let pattern = &structure[start + 2..end];
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return String::new();
    }

    match parse_timestamp(created_date) {
        Ok(created) => format!(
            "{}{}{}",
            &structure[..start],
            created.format(pattern),
            &structure[end + 1..]
        ),
        Err(_) => String::new(),
    }
}
