// ExifTool wrapper for capture date and camera extraction

use std::path::Path;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{MediaFlowError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExifMetadata {
    pub recorded_at: Option<String>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

impl ExifMetadata {
    /// "Make Model", dropping the make when the model already starts with it
    /// (Apple writes "Apple" / "iPhone 12", Canon writes "Canon" / "Canon EOS R6").
    pub fn camera_label(&self) -> Option<String> {
        match (&self.camera_make, &self.camera_model) {
            (Some(make), Some(model)) => {
                if model.to_lowercase().starts_with(&make.to_lowercase()) {
                    Some(model.clone())
                } else {
                    Some(format!("{} {}", make, model))
                }
            }
            (None, Some(model)) => Some(model.clone()),
            (Some(make), None) => Some(make.clone()),
            (None, None) => None,
        }
    }
}

/// Run exiftool (-j -G -n) on one file and parse the fields ingest needs.
pub fn extract(path: &Path) -> Result<ExifMetadata> {
    let output = Command::new(crate::tools::exiftool_path())
        .args(["-j", "-G", "-n"])
        .arg(path)
        .output()
        .map_err(|e| MediaFlowError::ExifTool(format!("Failed to run exiftool: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(MediaFlowError::ExifTool(format!(
            "exiftool exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            crate::tools::last_stderr_line(&stderr)
        )));
    }

    let raw_array: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| MediaFlowError::ExifTool(format!("Failed to parse exiftool JSON: {}", e)))?;

    // exiftool returns an array; take the first element
    let dump = raw_array
        .as_array()
        .and_then(|a| a.first())
        .cloned()
        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

    Ok(parse_dump(&dump))
}

/// Parse fields from a -G dump, where tags are prefixed "EXIF:Make",
/// "QuickTime:CreateDate", etc.
pub fn parse_dump(dump: &serde_json::Value) -> ExifMetadata {
    let date = get_grouped_string(dump, "DateTimeOriginal")
        .and_then(|d| parse_exif_date(&d))
        .or_else(|| get_grouped_string(dump, "CreateDate").and_then(|d| parse_exif_date(&d)))
        .or_else(|| get_grouped_string(dump, "MediaCreateDate").and_then(|d| parse_exif_date(&d)));

    ExifMetadata {
        recorded_at: date,
        camera_make: get_grouped_string(dump, "Make").map(|s| s.trim().to_string()),
        camera_model: get_grouped_string(dump, "Model").map(|s| s.trim().to_string()),
    }
}

/// Get a string value from a grouped exiftool dump, preferring the EXIF group.
fn get_grouped_string(dump: &serde_json::Value, tag: &str) -> Option<String> {
    let obj = dump.as_object()?;
    let exif_key = format!("EXIF:{}", tag);
    if let Some(val) = obj.get(&exif_key).and_then(value_to_string) {
        return Some(val);
    }
    let suffix = format!(":{}", tag);
    for (key, val) in obj {
        if key.ends_with(&suffix) || key == tag {
            if let Some(s) = value_to_string(val) {
                return Some(s);
            }
        }
    }
    None
}

fn value_to_string(val: &serde_json::Value) -> Option<String> {
    match val {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// "2019:07:04 12:30:45" (optionally followed by sub-seconds or a zone) to
/// "2019-07-04T12:30:45Z". Zeroed dates ("0000:00:00 00:00:00") yield None.
fn parse_exif_date(date_str: &str) -> Option<String> {
    let head = date_str.get(..19)?;
    let dt = chrono::NaiveDateTime::parse_from_str(head, "%Y:%m:%d %H:%M:%S").ok()?;
    Some(format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S")))
}

pub fn is_available() -> bool {
    crate::tools::is_tool_available("exiftool")
}
