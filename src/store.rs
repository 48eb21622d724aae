// File record store used by processing runs
//
// Each call touches a single record and is atomic on its own; no call spans
// records. Readers may see a file in `processing` while a run is working on it.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::schema::{
    self, BackupFlag, FileStatus, LogLevel, MediaFileRecord, NewMediaFile, PathKind,
};
use crate::constants::{STAT_DUPLICATES_FOUND, STAT_TOTAL_FILES};
use crate::error::Result;

pub trait FileRecordStore {
    /// Pending records, oldest created first, at most `limit`.
    fn list_pending(&self, limit: usize) -> Result<Vec<MediaFileRecord>>;

    fn update_status(&self, id: i64, status: FileStatus) -> Result<()>;

    fn update_compression(&self, id: i64, compressed_size_mb: f64, compressed_at: DateTime<Utc>) -> Result<()>;

    fn update_backup_flag(&self, id: i64, flag: BackupFlag, value: bool) -> Result<()>;

    /// Mark the record failed with the reason.
    fn record_failure(&self, id: i64, error_message: &str) -> Result<()>;

    fn set_path(&self, id: i64, kind: PathKind, path: &str) -> Result<()>;

    /// Insert a newly discovered file; None when the hash is already known.
    fn insert_if_new(&self, file: &NewMediaFile) -> Result<Option<i64>>;

    /// Whether an earlier ingest already registered this staged path.
    fn is_known_path(&self, staging_path: &str) -> Result<bool>;

    fn count_by_status(&self, status: FileStatus) -> Result<i64>;

    fn append_log(&self, file_id: Option<i64>, level: LogLevel, message: &str) -> Result<()>;

    fn add_to_stat(&self, key: &str, delta: f64) -> Result<()>;
}

/// SQLite-backed store. Owns its connection; the host opens it at startup and
/// drops it at shutdown.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Borrow the connection for read-side queries (listings, stats, logs).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }
}

impl FileRecordStore for SqliteStore {
    fn list_pending(&self, limit: usize) -> Result<Vec<MediaFileRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        schema::list_pending(&self.conn, limit)
    }

    fn update_status(&self, id: i64, status: FileStatus) -> Result<()> {
        schema::update_file_status(&self.conn, id, status)
    }

    fn update_compression(&self, id: i64, compressed_size_mb: f64, compressed_at: DateTime<Utc>) -> Result<()> {
        schema::update_compression(&self.conn, id, compressed_size_mb, compressed_at)
    }

    fn update_backup_flag(&self, id: i64, flag: BackupFlag, value: bool) -> Result<()> {
        schema::update_backup_flag(&self.conn, id, flag, value)
    }

    fn record_failure(&self, id: i64, error_message: &str) -> Result<()> {
        schema::record_failure(&self.conn, id, error_message)
    }

    fn set_path(&self, id: i64, kind: PathKind, path: &str) -> Result<()> {
        schema::set_file_path(&self.conn, id, kind, path)
    }

    fn insert_if_new(&self, file: &NewMediaFile) -> Result<Option<i64>> {
        let inserted = schema::insert_file_if_new(&self.conn, file)?;
        match inserted {
            Some(_) => schema::add_to_stat(&self.conn, STAT_TOTAL_FILES, 1.0)?,
            None => {
                if schema::record_duplicate(&self.conn, &file.file_hash, &file.staging_path)? {
                    schema::add_to_stat(&self.conn, STAT_DUPLICATES_FOUND, 1.0)?;
                }
            }
        }
        Ok(inserted)
    }

    fn is_known_path(&self, staging_path: &str) -> Result<bool> {
        schema::is_known_staging_path(&self.conn, staging_path)
    }

    fn count_by_status(&self, status: FileStatus) -> Result<i64> {
        schema::count_by_status(&self.conn, status)
    }

    fn append_log(&self, file_id: Option<i64>, level: LogLevel, message: &str) -> Result<()> {
        schema::insert_log(&self.conn, file_id, level, message)?;
        Ok(())
    }

    fn add_to_stat(&self, key: &str, delta: f64) -> Result<()> {
        schema::add_to_stat(&self.conn, key, delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_db;
    use crate::db::schema::MediaType;

    fn sample(hash: &str) -> NewMediaFile {
        NewMediaFile {
            file_hash: hash.to_string(),
            file_name: "IMG_0001.jpg".to_string(),
            media_type: MediaType::Image,
            original_size_mb: 3.2,
            camera: Some("iPhone 14 Pro".to_string()),
            created_date: "2024-05-01T10:00:00Z".to_string(),
            staging_path: "/staging/IMG_0001.jpg".to_string(),
        }
    }

    #[test]
    fn test_insert_if_new_counts_each_duplicate_path_once() {
        let store = SqliteStore::new(open_memory_db().unwrap());
        assert!(store.insert_if_new(&sample("h1")).unwrap().is_some());
        // Same path again is a rescan, not a duplicate
        assert!(store.insert_if_new(&sample("h1")).unwrap().is_none());

        let mut copy = sample("h1");
        copy.staging_path = "/staging/copy/IMG_0001.jpg".to_string();
        assert!(store.insert_if_new(&copy).unwrap().is_none());
        assert!(store.insert_if_new(&copy).unwrap().is_none());

        let stats = schema::get_stats(store.conn()).unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.duplicates_found, 1);
        assert!(store.is_known_path("/staging/copy/IMG_0001.jpg").unwrap());
        assert!(!store.is_known_path("/staging/other.jpg").unwrap());

        // The counter is rebuilt from rows
        schema::add_to_stat(store.conn(), STAT_DUPLICATES_FOUND, 40.0).unwrap();
        assert_eq!(schema::recompute_stats(store.conn()).unwrap().duplicates_found, 1);
    }

    #[test]
    fn test_list_pending_honors_limit() {
        let store = SqliteStore::new(open_memory_db().unwrap());
        for i in 0..5 {
            store.insert_if_new(&sample(&format!("h{}", i))).unwrap();
        }
        assert_eq!(store.list_pending(3).unwrap().len(), 3);
        assert_eq!(store.list_pending(usize::MAX).unwrap().len(), 5);
    }
}
