// Job runner - wires settings, database and stages into a run

use std::sync::Arc;

use rusqlite::Connection;

use crate::db::schema::{self, NewMediaFile};
use crate::db::{open_db, open_memory_db};
use crate::error::Result;
use crate::ingest::{self, IngestResult};
use crate::jobs::lock::lock_path_for;
use crate::jobs::progress::LogProgress;
use crate::jobs::{BatchSummary, CancelFlag, Orchestrator};
use crate::pipeline::PipelineStages;
use crate::settings::Settings;
use crate::store::{FileRecordStore, SqliteStore};
use crate::tools;

/// Run one processing batch against the configured database.
///
/// `simulate` swaps every stage for its deterministic stand-in and runs them
/// over an in-memory copy of the pending queue, so the library is left as it
/// was.
pub fn run_processing(settings: &Settings, simulate: bool, cancel: CancelFlag) -> Result<BatchSummary> {
    settings.validate()?;

    let db_path = settings.db_file();
    let conn = open_db(&db_path)?;

    if simulate {
        log::info!("Simulated run on a scratch copy of the queue; the library is not modified");
        let scratch = scratch_copy(&conn, settings.process_limit as usize)?;
        return Orchestrator::new(scratch, settings.clone(), PipelineStages::simulated())
            .with_cancel_flag(cancel)
            .with_progress(Arc::new(LogProgress))
            .run_batch();
    }

    for tool in missing_tools(settings) {
        log::warn!("{} not found; files that need it will fail", tool);
    }

    let orchestrator = Orchestrator::new(SqliteStore::new(conn), settings.clone(), PipelineStages::real(settings))
        .with_cancel_flag(cancel)
        .with_progress(Arc::new(LogProgress))
        .with_run_lock(lock_path_for(&db_path));

    orchestrator.run_batch()
}

/// In-memory store seeded with the next `limit` pending files.
fn scratch_copy(conn: &Connection, limit: usize) -> Result<SqliteStore> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let scratch = SqliteStore::new(open_memory_db()?);

    for record in schema::list_pending(conn, limit)? {
        scratch.insert_if_new(&NewMediaFile {
            file_hash: record.file_hash,
            file_name: record.file_name,
            media_type: record.media_type,
            original_size_mb: record.original_size_mb,
            camera: Some(record.camera),
            created_date: record.created_date,
            staging_path: record.staging_path,
        })?;
    }
    Ok(scratch)
}

/// Scan the staging directory into the configured database.
pub fn run_ingest(settings: &Settings) -> Result<IngestResult> {
    settings.validate()?;
    let conn = open_db(&settings.db_file())?;
    let store = SqliteStore::new(conn);
    ingest::ingest_staging(&store, settings)
}

/// External tools the enabled stages need but PATH does not have.
pub fn missing_tools(settings: &Settings) -> Vec<&'static str> {
    let mut needed = Vec::new();
    if settings.compression_enabled {
        needed.extend(["ffmpeg", "convert"]);
    }
    if settings.upload_enabled || settings.icloud_sync {
        needed.push("rclone");
    }
    needed.into_iter().filter(|t| !tools::is_tool_available(t)).collect()
}
