// Pipeline stage ports
//
// Each stage is an opaque, possibly long-running capability. Runs call them
// through these traits only, so the same orchestration works against real
// subprocess stages and deterministic simulations.

pub mod copy;
pub mod simulated;
pub mod subprocess;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::schema::{MediaFileRecord, MediaType};
use crate::error::Result;
use crate::policy::CompressionTier;
use crate::settings::Settings;

/// What a stage needs to know about the file it works on.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRef {
    pub id: i64,
    pub file_name: String,
    pub media_type: MediaType,
    pub original_size_mb: f64,
    pub created_date: String,
    pub path: PathBuf,
}

impl FileRef {
    /// Reference to the original staged file.
    pub fn original(record: &MediaFileRecord) -> Self {
        Self {
            id: record.id,
            file_name: record.file_name.clone(),
            media_type: record.media_type,
            original_size_mb: record.original_size_mb,
            created_date: record.created_date.clone(),
            path: PathBuf::from(&record.staging_path),
        }
    }

    /// Same file, different bytes on disk (e.g. the compressed output).
    pub fn with_path(&self, path: &Path) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.file_name.clone());
        Self {
            file_name,
            path: path.to_path_buf(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompressOutput {
    pub size_mb: f64,
    /// Where the compressed file was written, when the stage writes one.
    pub output_path: Option<PathBuf>,
}

/// Acknowledgement from a backup or upload stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ack {
    pub location: Option<String>,
}

pub trait Compressor: Send + Sync {
    fn compress(&self, file: &FileRef, tier: &CompressionTier) -> Result<CompressOutput>;
}

pub trait NasBackup: Send + Sync {
    fn backup(&self, file: &FileRef, destination: &Path) -> Result<Ack>;
}

pub trait CloudUploader: Send + Sync {
    fn upload(&self, file: &FileRef, destination: &str) -> Result<Ack>;
}

pub trait ICloudUploader: Send + Sync {
    fn upload(&self, file: &FileRef) -> Result<Ack>;
}

/// The four stages a run drives, in order.
#[derive(Clone)]
pub struct PipelineStages {
    pub compressor: Arc<dyn Compressor>,
    pub nas: Arc<dyn NasBackup>,
    pub cloud: Arc<dyn CloudUploader>,
    pub icloud: Arc<dyn ICloudUploader>,
}

impl PipelineStages {
    /// ffmpeg/ImageMagick compression, filesystem NAS copy, rclone uploads.
    pub fn real(settings: &Settings) -> Self {
        let timeout = settings.stage_timeout();
        Self {
            compressor: Arc::new(subprocess::FfmpegCompressor::new(
                settings.processed_path(),
                settings.preserve_exif,
                timeout,
            )),
            nas: Arc::new(subprocess::NasCopyBackup::new()),
            cloud: Arc::new(subprocess::RcloneUploader::new(timeout)),
            icloud: Arc::new(subprocess::ICloudRcloneUploader::new(
                settings.icloud_remote.clone(),
                settings.icloud_folder_structure.clone(),
                timeout,
            )),
        }
    }

    /// Deterministic stages that always succeed. Used for dry runs.
    pub fn simulated() -> Self {
        Self {
            compressor: Arc::new(simulated::SimulatedCompressor::new()),
            nas: Arc::new(simulated::SimulatedBackup::new()),
            cloud: Arc::new(simulated::SimulatedUploader::new()),
            icloud: Arc::new(simulated::SimulatedUploader::new()),
        }
    }
}
