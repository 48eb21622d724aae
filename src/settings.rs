// MediaFlow Settings
// One JSON document per install. Missing keys fall back to defaults, so older
// files keep loading after new settings are added.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{MediaFlowError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub app_name: String,

    // Filesystem roots
    pub staging_dir: String,
    pub archive_dir: String,
    pub processed_dir: String,
    pub log_dir: String,
    pub db_path: String,

    // Rclone (cloud upload)
    pub rclone_remote: String,
    pub drive_path: String,

    // iCloud
    pub icloud_sync: bool,
    pub icloud_user: String,
    pub icloud_remote: String,
    pub icloud_folder_structure: String,

    // Processing
    pub process_limit: u32,
    pub jpg_quality_medium: u8,
    pub jpg_quality_low: u8,
    #[serde(rename = "vidCRF1080p")]
    pub vid_crf_1080p: u8,
    #[serde(rename = "vidCRF720p")]
    pub vid_crf_720p: u8,
    #[serde(rename = "vidCRF640p")]
    pub vid_crf_640p: u8,
    pub preserve_exif: bool,
    pub stage_timeout_secs: Option<u64>,

    // Feature toggles
    pub compression_enabled: bool,
    pub upload_enabled: bool,

    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            staging_dir: DEFAULT_STAGING_DIR.to_string(),
            archive_dir: DEFAULT_ARCHIVE_DIR.to_string(),
            processed_dir: DEFAULT_PROCESSED_DIR.to_string(),
            log_dir: DEFAULT_LOG_DIR.to_string(),
            db_path: DEFAULT_DB_PATH.to_string(),
            rclone_remote: DEFAULT_RCLONE_REMOTE.to_string(),
            drive_path: DEFAULT_DRIVE_PATH.to_string(),
            icloud_sync: false,
            icloud_user: String::new(),
            icloud_remote: DEFAULT_ICLOUD_REMOTE.to_string(),
            icloud_folder_structure: DEFAULT_ICLOUD_FOLDER_STRUCTURE.to_string(),
            process_limit: DEFAULT_PROCESS_LIMIT,
            jpg_quality_medium: DEFAULT_JPG_QUALITY_MEDIUM,
            jpg_quality_low: DEFAULT_JPG_QUALITY_LOW,
            vid_crf_1080p: DEFAULT_VID_CRF_1080P,
            vid_crf_720p: DEFAULT_VID_CRF_720P,
            vid_crf_640p: DEFAULT_VID_CRF_640P,
            preserve_exif: true,
            stage_timeout_secs: None,
            compression_enabled: true,
            upload_enabled: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl Settings {
    /// Check that the environment is usable before any file is touched.
    pub fn validate(&self) -> Result<()> {
        let dirs = [
            ("stagingDir", &self.staging_dir),
            ("archiveDir", &self.archive_dir),
            ("processedDir", &self.processed_dir),
            ("logDir", &self.log_dir),
            ("dbPath", &self.db_path),
        ];
        for (key, value) in dirs {
            if value.trim().is_empty() {
                return Err(MediaFlowError::Config(format!("{} must not be empty", key)));
            }
        }

        if self.process_limit < 1 {
            return Err(MediaFlowError::Config("processLimit must be at least 1".to_string()));
        }

        for (key, quality) in [("jpgQualityMedium", self.jpg_quality_medium), ("jpgQualityLow", self.jpg_quality_low)] {
            if !(1..=100).contains(&quality) {
                return Err(MediaFlowError::Config(format!("{} must be between 1 and 100, got {}", key, quality)));
            }
        }

        for (key, crf) in [
            ("vidCRF1080p", self.vid_crf_1080p),
            ("vidCRF720p", self.vid_crf_720p),
            ("vidCRF640p", self.vid_crf_640p),
        ] {
            if crf > MAX_VIDEO_CRF {
                return Err(MediaFlowError::Config(format!("{} must be at most {}, got {}", key, MAX_VIDEO_CRF, crf)));
            }
        }

        if self.upload_enabled && self.rclone_remote.trim().is_empty() {
            return Err(MediaFlowError::Config("uploadEnabled requires rcloneRemote".to_string()));
        }

        if self.icloud_sync && self.icloud_remote.trim().is_empty() {
            return Err(MediaFlowError::Config("icloudSync requires icloudRemote".to_string()));
        }

        if self.stage_timeout_secs == Some(0) {
            return Err(MediaFlowError::Config("stageTimeoutSecs must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn staging_path(&self) -> PathBuf {
        PathBuf::from(&self.staging_dir)
    }

    pub fn archive_path(&self) -> PathBuf {
        PathBuf::from(&self.archive_dir)
    }

    pub fn processed_path(&self) -> PathBuf {
        PathBuf::from(&self.processed_dir)
    }

    pub fn db_file(&self) -> PathBuf {
        PathBuf::from(&self.db_path)
    }

    /// Rclone destination for cloud uploads, e.g. "gdrive:/Apps/MediaFlow/processed".
    pub fn cloud_destination(&self) -> String {
        format!("{}:{}", self.rclone_remote, self.drive_path)
    }

    pub fn stage_timeout(&self) -> Option<std::time::Duration> {
        self.stage_timeout_secs.map(std::time::Duration::from_secs)
    }
}

/// Default settings location: ~/.mediaflow/settings.json
/// MEDIAFLOW_SETTINGS overrides it.
pub fn default_settings_path() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(SETTINGS_PATH_ENV) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }

    let home = directories::BaseDirs::new()
        .ok_or_else(|| MediaFlowError::Config("Could not determine home directory".to_string()))?;
    Ok(home.home_dir().join(APP_CONFIG_DIR).join(SETTINGS_FILENAME))
}

/// Load settings, writing a default file first if none exists.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        log::info!("No settings at {}, writing defaults", path.display());
        save_settings(path, &Settings::default())?;
    }

    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)
        .map_err(|e| MediaFlowError::Config(format!("Invalid settings file {}: {}", path.display(), e)))?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json)?;
    Ok(())
}
