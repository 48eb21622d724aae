// Metadata extraction for ingest: media type, capture date, camera label

pub mod exiftool;

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{IMAGE_EXTENSIONS, UNKNOWN_CAMERA, VIDEO_EXTENSIONS};
use crate::db::schema::{format_timestamp, MediaType};

/// Where a file's creation date came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateSource {
    Exif,
    Folder,
    Filesystem,
    Ingest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    pub created_date: String,
    pub created_date_source: DateSource,
    pub camera: String,
}

/// Extract what ingest records about a file. exiftool is optional: without
/// it, dates fall back to the parent folder name and then the filesystem.
pub fn extract_metadata(path: &Path, use_exiftool: bool) -> MediaMetadata {
    let exif = if use_exiftool {
        match exiftool::extract(path) {
            Ok(meta) => Some(meta),
            Err(e) => {
                log::debug!("exiftool failed for {}: {}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    let camera = exif
        .as_ref()
        .and_then(|m| m.camera_label())
        .unwrap_or_else(|| UNKNOWN_CAMERA.to_string());

    if let Some(date) = exif.and_then(|m| m.recorded_at) {
        return MediaMetadata { created_date: date, created_date_source: DateSource::Exif, camera };
    }

    let folder_date = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .and_then(parse_folder_date);
    if let Some(date) = folder_date {
        return MediaMetadata { created_date: date, created_date_source: DateSource::Folder, camera };
    }

    if let Some(date) = file_system_date(path) {
        return MediaMetadata { created_date: date, created_date_source: DateSource::Filesystem, camera };
    }

    MediaMetadata {
        created_date: format_timestamp(Utc::now()),
        created_date_source: DateSource::Ingest,
        camera,
    }
}

/// Media type from extension; None for anything that is not image or video.
pub fn detect_media_type(path: &Path) -> Option<MediaType> {
    let ext = path.extension()?.to_str()?.to_lowercase();

    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Image)
    } else {
        None
    }
}

/// Try to parse a date from a folder name (e.g., "2019-07-04", "20190704",
/// "2019-07-04 Birthday").
pub fn parse_folder_date(folder_name: &str) -> Option<String> {
    let to_timestamp = |date: NaiveDate| format!("{}T00:00:00Z", date);

    if let Ok(date) = NaiveDate::parse_from_str(folder_name, "%Y-%m-%d") {
        return Some(to_timestamp(date));
    }

    if let Ok(date) = NaiveDate::parse_from_str(folder_name, "%Y%m%d") {
        return Some(to_timestamp(date));
    }

    let date_regex = regex::Regex::new(r"(\d{4})-(\d{2})-(\d{2})").ok()?;
    let caps = date_regex.captures(folder_name)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day).map(to_timestamp)
}

/// Birth time where the platform records it, else modification time.
fn file_system_date(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    let time = meta.created().or_else(|_| meta.modified()).ok()?;
    Some(format_timestamp(DateTime::<Utc>::from(time)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_detect_media_type() {
        assert_eq!(detect_media_type(&PathBuf::from("a/IMG_1.JPG")), Some(MediaType::Image));
        assert_eq!(detect_media_type(&PathBuf::from("clip.MOV")), Some(MediaType::Video));
        assert_eq!(detect_media_type(&PathBuf::from("photo.heic")), Some(MediaType::Image));
        assert_eq!(detect_media_type(&PathBuf::from("notes.txt")), None);
        assert_eq!(detect_media_type(&PathBuf::from("README")), None);
    }

    #[test]
    fn test_parse_folder_date() {
        assert_eq!(parse_folder_date("2019-07-04").as_deref(), Some("2019-07-04T00:00:00Z"));
        assert_eq!(parse_folder_date("20190704").as_deref(), Some("2019-07-04T00:00:00Z"));
        assert_eq!(
            parse_folder_date("2019-07-04 Birthday").as_deref(),
            Some("2019-07-04T00:00:00Z")
        );
        assert_eq!(parse_folder_date("2019-13-45 Nope"), None);
        assert_eq!(parse_folder_date("Vacation"), None);
    }

    #[test]
    fn test_folder_date_beats_filesystem_time() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("2012-05-20 Wedding");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("DSC_0001.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let meta = extract_metadata(&file, false);
        assert_eq!(meta.created_date, "2012-05-20T00:00:00Z");
        assert_eq!(meta.created_date_source, DateSource::Folder);
        assert_eq!(meta.camera, UNKNOWN_CAMERA);
    }

    #[test]
    fn test_filesystem_fallback() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("clip.mp4");
        std::fs::write(&file, b"video").unwrap();

        let meta = extract_metadata(&file, false);
        assert!(matches!(
            meta.created_date_source,
            DateSource::Filesystem | DateSource::Folder
        ));
        assert!(crate::db::schema::parse_timestamp(&meta.created_date).is_ok());
    }
}
