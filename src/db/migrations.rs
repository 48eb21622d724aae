// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use rusqlite::Connection;
use anyhow::Result;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Media inventory, one row per unique content hash
    CREATE TABLE files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_hash TEXT NOT NULL UNIQUE,
        file_name TEXT NOT NULL,
        file_type TEXT NOT NULL CHECK (file_type IN ('Image', 'Video')),
        original_size_mb REAL NOT NULL CHECK (original_size_mb >= 0),
        compressed_size_mb REAL CHECK (compressed_size_mb IS NULL OR compressed_size_mb >= 0),
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'success', 'failed')),
        camera TEXT NOT NULL DEFAULT 'Unknown',
        created_date TEXT NOT NULL,
        last_compressed_date TEXT,
        nas_backup_status INTEGER NOT NULL DEFAULT 0,
        cloud_upload_status INTEGER NOT NULL DEFAULT 0,
        icloud_upload_status INTEGER NOT NULL DEFAULT 0,
        staging_path TEXT NOT NULL,
        archive_path TEXT,
        processed_path TEXT,
        error_log TEXT,
        discovered_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
        updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    );

    -- Aggregate counters (derived; reconcilable from files)
    CREATE TABLE stats (
        key TEXT PRIMARY KEY NOT NULL,
        value REAL NOT NULL DEFAULT 0
    );

    INSERT INTO stats (key, value) VALUES ('total_files', 0);
    INSERT INTO stats (key, value) VALUES ('storage_saved_mb', 0);
    INSERT INTO stats (key, value) VALUES ('duplicates_found', 0);
    INSERT INTO stats (key, value) VALUES ('processing_errors', 0);

    -- Processing log
    CREATE TABLE logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER REFERENCES files(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        level TEXT NOT NULL CHECK (level IN ('INFO', 'WARN', 'ERROR')),
        message TEXT NOT NULL
    );

    CREATE INDEX idx_files_status_created ON files(status, created_date);
    CREATE INDEX idx_files_created ON files(created_date);
    CREATE INDEX idx_logs_file ON logs(file_id);
    CREATE INDEX idx_logs_timestamp ON logs(timestamp);
    "#,
    // Migration 2: one row per staged path whose content was already known,
    // so duplicates_found is countable and rescans are recognised
    r#"
    CREATE TABLE duplicates (
        staging_path TEXT PRIMARY KEY NOT NULL,
        file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        found_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
    );

    CREATE INDEX idx_files_staging_path ON files(staging_path);

    -- Earlier builds counted every rescan; start over from the table
    UPDATE stats SET value = 0 WHERE key = 'duplicates_found';
    "#,
];

/// Get current schema version from database
fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row(
        "PRAGMA user_version",
        [],
        |row| row.get(0)
    )?;
    Ok(version)
}

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a DB created by a newer build
    if current_version > target_version {
        anyhow::bail!(
            "Database schema version {} is newer than this build supports (max {}). Please upgrade MediaFlow.",
            current_version,
            target_version
        );
    }

    if current_version == target_version {
        return Ok(());
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        // Schema change and version bump commit together
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;
        tx.commit()?;

        log::info!("Applied migration {}", migration_version);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();
        assert!(run_migrations(&conn).is_err());
    }

    #[test]
    fn test_stats_seeded() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM stats", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 4);
    }
}
