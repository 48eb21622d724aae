// Database module

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use anyhow::Result;

/// Open or create the media library database at the given path.
/// The caller owns the connection for the life of the process.
pub fn open_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Database directory creation failed at {}: {}. Check directory permissions.",
                    parent.display(),
                    e
                )
            })?;
        }
    }

    let conn = Connection::open(db_path)?;

    // Enable foreign keys (must be done per connection)
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;

    // WAL lets the dashboard read while a run is writing
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Fresh in-memory database with all migrations applied.
pub fn open_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}
