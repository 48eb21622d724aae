// Database schema types and query helpers

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::constants::{
    LOG_FAILURE_PREFIX, LOG_SUCCESS_PREFIX, STAT_DUPLICATES_FOUND, STAT_PROCESSING_ERRORS,
    STAT_STORAGE_SAVED_MB, STAT_TOTAL_FILES, UNKNOWN_CAMERA,
};
use crate::error::{MediaFlowError, Result};

/// Timestamps are stored as RFC 3339 UTC with second precision, so they sort
/// lexicographically.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MediaFlowError::Other(format!("Invalid timestamp '{}': {}", value, e)))
}

// ----- Enums -----

/// Processing status. `pending -> processing -> success | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Success => "success",
            FileStatus::Failed => "failed",
        }
    }

    /// States a record may be in immediately before moving to `self`.
    /// Moving back to pending is the explicit requeue, never the orchestrator.
    pub fn allowed_predecessors(&self) -> &'static [FileStatus] {
        match self {
            FileStatus::Pending => &[FileStatus::Failed, FileStatus::Processing],
            FileStatus::Processing => &[FileStatus::Pending],
            FileStatus::Success | FileStatus::Failed => &[FileStatus::Processing],
        }
    }

    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        next.allowed_predecessors().contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Success | FileStatus::Failed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = MediaFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "success" => Ok(FileStatus::Success),
            "failed" => Ok(FileStatus::Failed),
            other => Err(MediaFlowError::Other(format!("Unknown status: {}", other))),
        }
    }
}

impl ToSql for FileStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for FileStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "Image",
            MediaType::Video => "Video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = MediaFlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Image" => Ok(MediaType::Image),
            "Video" => Ok(MediaType::Video),
            other => Err(MediaFlowError::Other(format!("Unknown media type: {}", other))),
        }
    }
}

impl ToSql for MediaType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for MediaType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Per-stage completion flags on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFlag {
    Nas,
    Cloud,
    ICloud,
}

impl BackupFlag {
    fn column(&self) -> &'static str {
        match self {
            BackupFlag::Nas => "nas_backup_status",
            BackupFlag::Cloud => "cloud_upload_status",
            BackupFlag::ICloud => "icloud_upload_status",
        }
    }
}

/// Paths filled in as stages complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Archive,
    Processed,
}

impl PathKind {
    fn column(&self) -> &'static str {
        match self {
            PathKind::Archive => "archive_path",
            PathKind::Processed => "processed_path",
        }
    }
}

// ----- Media files -----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileRecord {
    pub id: i64,
    pub file_hash: String,
    pub file_name: String,
    pub media_type: MediaType,
    pub original_size_mb: f64,
    pub compressed_size_mb: Option<f64>,
    pub status: FileStatus,
    pub camera: String,
    pub created_date: String,
    pub last_compressed_date: Option<String>,
    pub nas_backup: bool,
    pub cloud_upload: bool,
    pub icloud_upload: bool,
    pub staging_path: String,
    pub archive_path: Option<String>,
    pub processed_path: Option<String>,
    pub error_log: Option<String>,
    pub updated_at: String,
}

impl MediaFileRecord {
    pub fn created_at(&self) -> Result<DateTime<Utc>> {
        parse_timestamp(&self.created_date)
    }

    /// The file a viewer should be served: processed > archive > staging.
    pub fn servable_path(&self) -> &str {
        self.processed_path
            .as_deref()
            .or(self.archive_path.as_deref())
            .unwrap_or(&self.staging_path)
    }
}

#[derive(Debug, Clone)]
pub struct NewMediaFile {
    pub file_hash: String,
    pub file_name: String,
    pub media_type: MediaType,
    pub original_size_mb: f64,
    pub camera: Option<String>,
    pub created_date: String,
    pub staging_path: String,
}

const FILE_COLUMNS: &str = "id, file_hash, file_name, file_type, original_size_mb, compressed_size_mb,
    status, camera, created_date, last_compressed_date, nas_backup_status, cloud_upload_status,
    icloud_upload_status, staging_path, archive_path, processed_path, error_log, updated_at";

fn map_file_row(row: &Row<'_>) -> rusqlite::Result<MediaFileRecord> {
    Ok(MediaFileRecord {
        id: row.get(0)?,
        file_hash: row.get(1)?,
        file_name: row.get(2)?,
        media_type: row.get(3)?,
        original_size_mb: row.get(4)?,
        compressed_size_mb: row.get(5)?,
        status: row.get(6)?,
        camera: row.get::<_, Option<String>>(7)?.unwrap_or_else(|| UNKNOWN_CAMERA.to_string()),
        created_date: row.get(8)?,
        last_compressed_date: row.get(9)?,
        nas_backup: row.get(10)?,
        cloud_upload: row.get(11)?,
        icloud_upload: row.get(12)?,
        staging_path: row.get(13)?,
        archive_path: row.get(14)?,
        processed_path: row.get(15)?,
        error_log: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

/// Insert a discovered file unless its hash is already known.
/// Returns the new id, or None for a duplicate.
pub fn insert_file_if_new(conn: &Connection, file: &NewMediaFile) -> Result<Option<i64>> {
    let camera = file
        .camera
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(UNKNOWN_CAMERA);

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO files
            (file_hash, file_name, file_type, original_size_mb, status, camera, created_date, staging_path)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5, ?6, ?7)",
        params![
            file.file_hash,
            file.file_name,
            file.media_type,
            file.original_size_mb,
            camera,
            file.created_date,
            file.staging_path,
        ],
    )?;

    if inserted == 0 {
        Ok(None)
    } else {
        Ok(Some(conn.last_insert_rowid()))
    }
}

/// Record that `staging_path` holds content already stored under another
/// path. Returns true only the first time the path is seen.
pub fn record_duplicate(conn: &Connection, file_hash: &str, staging_path: &str) -> Result<bool> {
    let Some(existing) = find_file_by_hash(conn, file_hash)? else {
        return Ok(false);
    };
    if existing.staging_path == staging_path {
        return Ok(false);
    }

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO duplicates (staging_path, file_id) VALUES (?1, ?2)",
        params![staging_path, existing.id],
    )?;
    Ok(inserted > 0)
}

/// True when an earlier scan already registered this staged path, either as
/// a file or as a duplicate of one.
pub fn is_known_staging_path(conn: &Connection, staging_path: &str) -> Result<bool> {
    let known: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM files WHERE staging_path = ?1)
             OR EXISTS (SELECT 1 FROM duplicates WHERE staging_path = ?1)",
        params![staging_path],
        |row| row.get(0),
    )?;
    Ok(known)
}

pub fn get_file(conn: &Connection, id: i64) -> Result<Option<MediaFileRecord>> {
    let sql = format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS);
    let result = conn.query_row(&sql, params![id], map_file_row).optional()?;
    Ok(result)
}

pub fn find_file_by_hash(conn: &Connection, file_hash: &str) -> Result<Option<MediaFileRecord>> {
    let sql = format!("SELECT {} FROM files WHERE file_hash = ?1", FILE_COLUMNS);
    let result = conn.query_row(&sql, params![file_hash], map_file_row).optional()?;
    Ok(result)
}

pub fn find_file_by_name(conn: &Connection, file_name: &str) -> Result<Option<MediaFileRecord>> {
    let sql = format!("SELECT {} FROM files WHERE file_name = ?1 ORDER BY id LIMIT 1", FILE_COLUMNS);
    let result = conn.query_row(&sql, params![file_name], map_file_row).optional()?;
    Ok(result)
}

/// Newest first, optionally filtered by status.
pub fn list_files(conn: &Connection, status: Option<FileStatus>, limit: i64) -> Result<Vec<MediaFileRecord>> {
    let files = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {} FROM files WHERE status = ?1 ORDER BY created_date DESC, id DESC LIMIT ?2",
                FILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![status, limit], map_file_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM files ORDER BY created_date DESC, id DESC LIMIT ?1",
                FILE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![limit], map_file_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(files)
}

/// Pending files, oldest created first, so every run drains the backlog in FIFO order.
pub fn list_pending(conn: &Connection, limit: i64) -> Result<Vec<MediaFileRecord>> {
    let sql = format!(
        "SELECT {} FROM files WHERE status = 'pending' ORDER BY created_date ASC, id ASC LIMIT ?1",
        FILE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map(params![limit], map_file_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

/// Failed files with their error log, most recently updated first.
pub fn list_failed(conn: &Connection) -> Result<Vec<MediaFileRecord>> {
    let sql = format!(
        "SELECT {} FROM files WHERE status = 'failed' ORDER BY updated_at DESC, id DESC",
        FILE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let files = stmt
        .query_map([], map_file_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(files)
}

pub fn count_by_status(conn: &Connection, status: FileStatus) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM files WHERE status = ?1",
        params![status],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Explain why a guarded single-row UPDATE touched nothing.
fn missed_update(conn: &Connection, id: i64, action: &str) -> MediaFlowError {
    match get_file(conn, id) {
        Ok(Some(file)) => MediaFlowError::Store(format!(
            "Cannot {} file {} while it is {}",
            action, id, file.status
        )),
        Ok(None) => MediaFlowError::NotFound(format!("file {}", id)),
        Err(e) => e,
    }
}

/// Move a file to `status`, enforcing the state machine in the same statement.
pub fn update_file_status(conn: &Connection, id: i64, status: FileStatus) -> Result<()> {
    let allowed = status
        .allowed_predecessors()
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    let sql = format!(
        "UPDATE files SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status IN ({})",
        allowed
    );
    let rows = conn.execute(&sql, params![status, format_timestamp(Utc::now()), id])?;

    if rows == 0 {
        return Err(missed_update(conn, id, &format!("move to {}", status)));
    }
    Ok(())
}

pub fn update_compression(conn: &Connection, id: i64, compressed_size_mb: f64, compressed_at: DateTime<Utc>) -> Result<()> {
    if !compressed_size_mb.is_finite() || compressed_size_mb < 0.0 {
        return Err(MediaFlowError::Store(format!(
            "Refusing to store compressed size {} for file {}",
            compressed_size_mb, id
        )));
    }

    let now = format_timestamp(Utc::now());
    let rows = conn.execute(
        "UPDATE files SET compressed_size_mb = ?1, last_compressed_date = ?2, updated_at = ?3
         WHERE id = ?4 AND status = 'processing'",
        params![compressed_size_mb, format_timestamp(compressed_at), now, id],
    )?;

    if rows == 0 {
        return Err(missed_update(conn, id, "record compression for"));
    }
    Ok(())
}

pub fn update_backup_flag(conn: &Connection, id: i64, flag: BackupFlag, value: bool) -> Result<()> {
    let sql = format!(
        "UPDATE files SET {} = ?1, updated_at = ?2 WHERE id = ?3",
        flag.column()
    );
    let rows = conn.execute(&sql, params![value, format_timestamp(Utc::now()), id])?;
    if rows == 0 {
        return Err(MediaFlowError::NotFound(format!("file {}", id)));
    }
    Ok(())
}

pub fn set_file_path(conn: &Connection, id: i64, kind: PathKind, path: &str) -> Result<()> {
    let sql = format!(
        "UPDATE files SET {} = ?1, updated_at = ?2 WHERE id = ?3",
        kind.column()
    );
    let rows = conn.execute(&sql, params![path, format_timestamp(Utc::now()), id])?;
    if rows == 0 {
        return Err(MediaFlowError::NotFound(format!("file {}", id)));
    }
    Ok(())
}

/// Mark a processing file failed. The compressed size is cleared so only
/// processing/success rows ever carry one.
pub fn record_failure(conn: &Connection, id: i64, error_message: &str) -> Result<()> {
    let rows = conn.execute(
        "UPDATE files SET status = 'failed', error_log = ?1, compressed_size_mb = NULL, updated_at = ?2
         WHERE id = ?3 AND status = 'processing'",
        params![error_message, format_timestamp(Utc::now()), id],
    )?;

    if rows == 0 {
        return Err(missed_update(conn, id, "record failure for"));
    }
    Ok(())
}

/// Put a failed (or stuck processing) file back in the queue.
/// This is an operator action; runs never call it.
pub fn requeue_file(conn: &Connection, id: i64) -> Result<()> {
    let rows = conn.execute(
        "UPDATE files SET status = 'pending', error_log = NULL, compressed_size_mb = NULL,
            last_compressed_date = NULL, nas_backup_status = 0, cloud_upload_status = 0,
            icloud_upload_status = 0, archive_path = NULL, processed_path = NULL, updated_at = ?1
         WHERE id = ?2 AND status IN ('failed', 'processing')",
        params![format_timestamp(Utc::now()), id],
    )?;

    if rows == 0 {
        return Err(missed_update(conn, id, "requeue"));
    }
    Ok(())
}

/// Requeue every failed file. Returns how many were requeued.
pub fn requeue_all_failed(conn: &Connection) -> Result<usize> {
    let ids: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT id FROM files WHERE status = 'failed' ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<std::result::Result<Vec<_>, _>>()?
    };

    for id in &ids {
        requeue_file(conn, *id)?;
    }
    Ok(ids.len())
}

// ----- Stats -----

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStats {
    pub total_files: i64,
    pub storage_saved_mb: f64,
    pub duplicates_found: i64,
    pub processing_errors: i64,
}

pub fn get_stats(conn: &Connection) -> Result<AggregateStats> {
    let mut stmt = conn.prepare("SELECT key, value FROM stats")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?;

    let mut stats = AggregateStats::default();
    for row in rows {
        let (key, value) = row?;
        match key.as_str() {
            STAT_TOTAL_FILES => stats.total_files = value as i64,
            STAT_STORAGE_SAVED_MB => stats.storage_saved_mb = value,
            STAT_DUPLICATES_FOUND => stats.duplicates_found = value as i64,
            STAT_PROCESSING_ERRORS => stats.processing_errors = value as i64,
            _ => {}
        }
    }
    Ok(stats)
}

pub fn add_to_stat(conn: &Connection, key: &str, delta: f64) -> Result<()> {
    conn.execute(
        "INSERT INTO stats (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = value + excluded.value",
        params![key, delta],
    )?;
    Ok(())
}

/// Rebuild every counter from the file and duplicate rows.
pub fn recompute_stats(conn: &Connection) -> Result<AggregateStats> {
    let total_files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
    let storage_saved_mb: f64 = conn.query_row(
        "SELECT COALESCE(SUM(MAX(original_size_mb - compressed_size_mb, 0)), 0)
         FROM files WHERE status = 'success' AND compressed_size_mb IS NOT NULL",
        [],
        |row| row.get(0),
    )?;
    let processing_errors = count_by_status(conn, FileStatus::Failed)?;
    let duplicates_found: i64 = conn.query_row("SELECT COUNT(*) FROM duplicates", [], |row| row.get(0))?;

    let tx = conn.unchecked_transaction()?;
    for (key, value) in [
        (STAT_TOTAL_FILES, total_files as f64),
        (STAT_STORAGE_SAVED_MB, storage_saved_mb),
        (STAT_DUPLICATES_FOUND, duplicates_found as f64),
        (STAT_PROCESSING_ERRORS, processing_errors as f64),
    ] {
        tx.execute(
            "INSERT INTO stats (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
    }
    tx.commit()?;

    get_stats(conn)
}

// ----- Logs -----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl ToSql for LogLevel {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for LogLevel {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: i64,
    pub file_id: Option<i64>,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

fn map_log_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        file_id: row.get(1)?,
        timestamp: row.get(2)?,
        level: row.get(3)?,
        message: row.get(4)?,
    })
}

pub fn insert_log(conn: &Connection, file_id: Option<i64>, level: LogLevel, message: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO logs (file_id, timestamp, level, message) VALUES (?1, ?2, ?3, ?4)",
        params![file_id, format_timestamp(Utc::now()), level, message],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_logs(conn: &Connection, limit: i64) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_id, timestamp, level, message FROM logs ORDER BY timestamp DESC, id DESC LIMIT ?1",
    )?;
    let logs = stmt
        .query_map(params![limit], map_log_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(logs)
}

pub fn list_logs_for_file(conn: &Connection, file_id: i64) -> Result<Vec<LogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, file_id, timestamp, level, message FROM logs WHERE file_id = ?1 ORDER BY timestamp ASC, id ASC",
    )?;
    let logs = stmt
        .query_map(params![file_id], map_log_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(logs)
}

// ----- Processing history -----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingHistoryPoint {
    pub day: String,
    pub name: String,
    pub processed: i64,
    pub failed: i64,
}

/// Daily processed/failed counts for the `days` days ending at `now`,
/// oldest first, with empty days filled in.
pub fn processing_history(conn: &Connection, days: i64, now: DateTime<Utc>) -> Result<Vec<ProcessingHistoryPoint>> {
    let days = days.max(1);
    let today = now.date_naive();
    let first_day = today - Duration::days(days - 1);
    let since = format!("{}T00:00:00Z", first_day.format("%Y-%m-%d"));

    let mut stmt = conn.prepare(
        "SELECT strftime('%Y-%m-%d', timestamp) AS day,
                SUM(CASE WHEN message LIKE ?2 || '%' THEN 1 ELSE 0 END) AS processed,
                SUM(CASE WHEN level = 'ERROR' AND message LIKE ?3 || '%' THEN 1 ELSE 0 END) AS failed
         FROM logs
         WHERE timestamp >= ?1
         GROUP BY day",
    )?;
    let rows = stmt
        .query_map(params![since, LOG_SUCCESS_PREFIX, LOG_FAILURE_PREFIX], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let history = (0..days)
        .map(|offset| {
            let date: NaiveDate = first_day + Duration::days(offset);
            let key = date.format("%Y-%m-%d").to_string();
            let (processed, failed) = rows
                .iter()
                .find(|(day, _, _)| *day == key)
                .map(|(_, p, f)| (*p, *f))
                .unwrap_or((0, 0));
            ProcessingHistoryPoint {
                name: date.format("%a").to_string(),
                day: key,
                processed,
                failed,
            }
        })
        .collect();

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_db;

    fn new_file(hash: &str, created: &str) -> NewMediaFile {
        NewMediaFile {
            file_hash: hash.to_string(),
            file_name: format!("{}.jpg", hash),
            media_type: MediaType::Image,
            original_size_mb: 4.0,
            camera: None,
            created_date: created.to_string(),
            staging_path: format!("/staging/{}.jpg", hash),
        }
    }

    #[test]
    fn test_insert_dedups_on_hash() {
        let conn = open_memory_db().unwrap();
        let first = insert_file_if_new(&conn, &new_file("aaa", "2024-01-01T00:00:00Z")).unwrap();
        let second = insert_file_if_new(&conn, &new_file("aaa", "2024-02-01T00:00:00Z")).unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_camera_defaults_to_unknown() {
        let conn = open_memory_db().unwrap();
        let id = insert_file_if_new(&conn, &new_file("cam", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        let file = get_file(&conn, id).unwrap().unwrap();
        assert_eq!(file.camera, "Unknown");
        assert_eq!(file.status, FileStatus::Pending);
        assert!(file.compressed_size_mb.is_none());
    }

    #[test]
    fn test_list_pending_is_oldest_first_and_limited() {
        let conn = open_memory_db().unwrap();
        insert_file_if_new(&conn, &new_file("c", "2023-03-01T00:00:00Z")).unwrap();
        insert_file_if_new(&conn, &new_file("a", "2021-01-01T00:00:00Z")).unwrap();
        insert_file_if_new(&conn, &new_file("b", "2022-06-01T00:00:00Z")).unwrap();

        let pending = list_pending(&conn, 2).unwrap();
        let hashes: Vec<&str> = pending.iter().map(|f| f.file_hash.as_str()).collect();
        assert_eq!(hashes, vec!["a", "b"]);
    }

    #[test]
    fn test_status_transitions_are_guarded() {
        let conn = open_memory_db().unwrap();
        let id = insert_file_if_new(&conn, &new_file("s", "2024-01-01T00:00:00Z")).unwrap().unwrap();

        // pending -> success skips processing
        let err = update_file_status(&conn, id, FileStatus::Success).unwrap_err();
        assert!(matches!(err, MediaFlowError::Store(_)));

        update_file_status(&conn, id, FileStatus::Processing).unwrap();
        update_file_status(&conn, id, FileStatus::Success).unwrap();

        // terminal
        assert!(update_file_status(&conn, id, FileStatus::Processing).is_err());
        assert_eq!(get_file(&conn, id).unwrap().unwrap().status, FileStatus::Success);
    }

    #[test]
    fn test_update_missing_file_is_not_found() {
        let conn = open_memory_db().unwrap();
        let err = update_file_status(&conn, 42, FileStatus::Processing).unwrap_err();
        assert!(matches!(err, MediaFlowError::NotFound(_)));
    }

    #[test]
    fn test_record_failure_clears_compressed_size() {
        let conn = open_memory_db().unwrap();
        let id = insert_file_if_new(&conn, &new_file("f", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        update_file_status(&conn, id, FileStatus::Processing).unwrap();
        update_compression(&conn, id, 1.5, Utc::now()).unwrap();
        record_failure(&conn, id, "Backup error: NAS offline").unwrap();

        let file = get_file(&conn, id).unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Failed);
        assert_eq!(file.error_log.as_deref(), Some("Backup error: NAS offline"));
        assert!(file.compressed_size_mb.is_none());
        assert!(file.last_compressed_date.is_some());
    }

    #[test]
    fn test_compression_requires_processing() {
        let conn = open_memory_db().unwrap();
        let id = insert_file_if_new(&conn, &new_file("p", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        assert!(update_compression(&conn, id, 1.0, Utc::now()).is_err());
        update_file_status(&conn, id, FileStatus::Processing).unwrap();
        assert!(update_compression(&conn, id, -1.0, Utc::now()).is_err());
        assert!(update_compression(&conn, id, 1.0, Utc::now()).is_ok());
    }

    #[test]
    fn test_servable_path_priority() {
        let conn = open_memory_db().unwrap();
        let id = insert_file_if_new(&conn, &new_file("v", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        assert_eq!(get_file(&conn, id).unwrap().unwrap().servable_path(), "/staging/v.jpg");

        set_file_path(&conn, id, PathKind::Archive, "/archive/v.jpg").unwrap();
        assert_eq!(get_file(&conn, id).unwrap().unwrap().servable_path(), "/archive/v.jpg");

        set_file_path(&conn, id, PathKind::Processed, "/processed/v.jpg").unwrap();
        assert_eq!(get_file(&conn, id).unwrap().unwrap().servable_path(), "/processed/v.jpg");
    }

    #[test]
    fn test_requeue_resets_failed_file() {
        let conn = open_memory_db().unwrap();
        let id = insert_file_if_new(&conn, &new_file("r", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        update_file_status(&conn, id, FileStatus::Processing).unwrap();
        update_backup_flag(&conn, id, BackupFlag::Nas, true).unwrap();
        record_failure(&conn, id, "Upload error: 401").unwrap();

        assert_eq!(requeue_all_failed(&conn).unwrap(), 1);
        let file = get_file(&conn, id).unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert!(file.error_log.is_none());
        assert!(!file.nas_backup);

        // pending files cannot be requeued
        assert!(requeue_file(&conn, id).is_err());
    }

    #[test]
    fn test_recompute_stats_from_rows() {
        let conn = open_memory_db().unwrap();
        let ok = insert_file_if_new(&conn, &new_file("ok", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        let bad = insert_file_if_new(&conn, &new_file("bad", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        insert_file_if_new(&conn, &new_file("wait", "2024-01-01T00:00:00Z")).unwrap();
        add_to_stat(&conn, STAT_DUPLICATES_FOUND, 9.0).unwrap();

        let ok_file = get_file(&conn, ok).unwrap().unwrap();
        assert!(record_duplicate(&conn, &ok_file.file_hash, "/staging/copy-1.jpg").unwrap());
        assert!(record_duplicate(&conn, &ok_file.file_hash, "/staging/copy-2.jpg").unwrap());
        assert!(!record_duplicate(&conn, &ok_file.file_hash, "/staging/copy-2.jpg").unwrap());
        assert!(!record_duplicate(&conn, &ok_file.file_hash, &ok_file.staging_path).unwrap());

        update_file_status(&conn, ok, FileStatus::Processing).unwrap();
        update_compression(&conn, ok, 1.0, Utc::now()).unwrap();
        update_file_status(&conn, ok, FileStatus::Success).unwrap();

        update_file_status(&conn, bad, FileStatus::Processing).unwrap();
        record_failure(&conn, bad, "Compression error: codec").unwrap();

        let stats = recompute_stats(&conn).unwrap();
        assert_eq!(stats.total_files, 3);
        assert_eq!(stats.processing_errors, 1);
        assert_eq!(stats.duplicates_found, 2);
        assert!((stats.storage_saved_mb - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_logs_and_history() {
        let conn = open_memory_db().unwrap();
        let id = insert_file_if_new(&conn, &new_file("l", "2024-01-01T00:00:00Z")).unwrap().unwrap();
        insert_log(&conn, Some(id), LogLevel::Info, "SUCCESS: Processing complete for l.jpg").unwrap();
        insert_log(&conn, Some(id), LogLevel::Error, "ERROR: Processing FAILED for l.jpg: boom").unwrap();
        insert_log(&conn, None, LogLevel::Info, "Run started").unwrap();

        assert_eq!(list_logs_for_file(&conn, id).unwrap().len(), 2);
        assert_eq!(list_logs(&conn, 10).unwrap().len(), 3);

        let history = processing_history(&conn, 7, Utc::now()).unwrap();
        assert_eq!(history.len(), 7);
        let today = history.last().unwrap();
        assert_eq!(today.processed, 1);
        assert_eq!(today.failed, 1);
        assert!(history[..6].iter().all(|p| p.processed == 0 && p.failed == 0));
    }

    #[test]
    fn test_status_round_trip_and_transitions() {
        assert_eq!("processing".parse::<FileStatus>().unwrap(), FileStatus::Processing);
        assert!("done".parse::<FileStatus>().is_err());
        assert!(FileStatus::Pending.can_transition_to(FileStatus::Processing));
        assert!(!FileStatus::Pending.can_transition_to(FileStatus::Success));
        assert!(FileStatus::Failed.is_terminal());
    }
}
