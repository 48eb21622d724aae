// MediaFlow - Library Entry Point
//
// Staged photos and videos are ingested as pending records, then each
// processing run compresses them by age, backs them up to the NAS and
// uploads them to the configured clouds.

pub mod constants;
pub mod error;
pub mod settings;
pub mod tools;
pub mod db;
pub mod hash;
pub mod store;
pub mod policy;
pub mod pipeline;
pub mod metadata;
pub mod ingest;
pub mod jobs;

pub use error::{MediaFlowError, Result};
pub use jobs::{BatchSummary, CancelFlag, Orchestrator};
pub use pipeline::PipelineStages;
pub use policy::{select_tier, CompressionTier, TierLevel};
pub use settings::Settings;
pub use store::{FileRecordStore, SqliteStore};

use std::path::Path;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

/// Install the global log subscriber. `log` records from every module are
/// forwarded through tracing-subscriber's log bridge. RUST_LOG, when set,
/// overrides `default_level`.
///
/// With `log_dir`, records also go to a daily file there. Keep the returned
/// guard alive until exit so buffered lines are flushed.
pub fn init_logging(default_level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new(constants::DEFAULT_LOG_LEVEL));

    let mut file_error = None;
    let (file_layer, guard) = match log_dir.map(file_writer) {
        Some(Ok((writer, guard))) => (
            Some(fmt::layer().with_ansi(false).with_target(false).with_writer(writer)),
            Some(guard),
        ),
        Some(Err(e)) => {
            file_error = Some(e);
            (None, None)
        }
        None => (None, None),
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    if let Some(e) = file_error {
        log::warn!("File logging disabled: {}", e);
    }

    // A second call (e.g. from tests) keeps the first subscriber
    installed.ok().and(guard)
}

/// Non-blocking writer for a daily rolling file in `dir`.
pub fn file_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(constants::LOG_FILE_PREFIX)
        .filename_suffix(constants::LOG_FILE_SUFFIX)
        .build(dir)
        .map_err(|e| MediaFlowError::Other(format!("log file in {}: {}", dir.display(), e)))?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_file_writer_creates_daily_log() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("logs");

        let (mut writer, guard) = file_writer(&dir).unwrap();
        writer.write_all(b"INFO Processing run started\n").unwrap();
        drop(writer);
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].starts_with("mediaflow."));
        assert!(files[0].ends_with(".log"));

        let contents = std::fs::read_to_string(dir.join(&files[0])).unwrap();
        assert!(contents.contains("Processing run started"));
    }
}
