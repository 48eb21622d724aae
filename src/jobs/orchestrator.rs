// Processing orchestrator
//
// One run walks the pending queue oldest-first, one file at a time:
//
//   pending -> processing -> compress -> NAS backup -> cloud upload -> iCloud upload -> success
//                                   \________ any failure ________/ -> failed
//
// Stage failures stay inside the file that caused them. Only a bad
// configuration, a held run lock or an unreachable store escape run_batch.
// Losing the run lock mid-run stops before the next file and still reports.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    LOG_FAILURE_PREFIX, LOG_SUCCESS_PREFIX, STAT_PROCESSING_ERRORS, STAT_STORAGE_SAVED_MB,
    STORE_FAILURE_ABORT_THRESHOLD,
};
use crate::db::schema::{BackupFlag, FileStatus, LogLevel, MediaFileRecord, PathKind};
use crate::error::{MediaFlowError, Result};
use crate::jobs::lock::RunLock;
use crate::jobs::progress::{JobProgress, NoProgress, ProgressSink};
use crate::jobs::CancelFlag;
use crate::pipeline::{FileRef, PipelineStages};
use crate::policy::{file_age_years, select_tier, CompressionTier};
use crate::settings::Settings;
use crate::store::FileRecordStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Files attempted this run, successful or not.
    pub processed_count: usize,
    pub failed_count: usize,
    /// Stopped early; unstarted files are still pending.
    pub cancelled: bool,
    /// Why the run stopped before the end of the queue, other than cancellation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    pub message: String,
}

impl BatchSummary {
    fn empty() -> Self {
        Self {
            message: "No pending files to process.".to_string(),
            ..Default::default()
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.processed_count - self.failed_count
    }
}

enum FileOutcome {
    Success,
    Failed(String),
    /// The store rejected a write for this file.
    StoreFailed(String),
}

pub struct Orchestrator<S: FileRecordStore> {
    store: S,
    settings: Settings,
    stages: PipelineStages,
    cancel: CancelFlag,
    progress: Arc<dyn ProgressSink>,
    lock_path: Option<PathBuf>,
    fixed_now: Option<DateTime<Utc>>,
}

impl<S: FileRecordStore> Orchestrator<S> {
    pub fn new(store: S, settings: Settings, stages: PipelineStages) -> Self {
        Self {
            store,
            settings,
            stages,
            cancel: CancelFlag::new(),
            progress: Arc::new(NoProgress),
            lock_path: None,
            fixed_now: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Hold the run lock at `path` for the duration of each run.
    pub fn with_run_lock(mut self, path: PathBuf) -> Self {
        self.lock_path = Some(path);
        self
    }

    /// Compute file ages against a fixed instant instead of the wall clock.
    pub fn with_clock(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn now(&self) -> DateTime<Utc> {
        self.fixed_now.unwrap_or_else(Utc::now)
    }

    /// Process up to `processLimit` pending files. A cancel applies to the
    /// run in progress and is cleared when that run returns a summary.
    pub fn run_batch(&self) -> Result<BatchSummary> {
        self.settings.validate()?;

        let mut lock = match &self.lock_path {
            Some(path) => Some(RunLock::acquire(path)?),
            None => None,
        };

        let stuck = self
            .store
            .count_by_status(FileStatus::Processing)
            .map_err(|e| MediaFlowError::StoreUnavailable(e.to_string()))?;
        if stuck > 0 {
            log::warn!(
                "{} files are stuck in processing from an earlier run; requeue them to retry",
                stuck
            );
        }

        let limit = self.settings.process_limit as usize;
        let pending = self
            .store
            .list_pending(limit)
            .map_err(|e| MediaFlowError::StoreUnavailable(e.to_string()))?;

        if pending.is_empty() {
            log::info!("No pending files to process");
            self.cancel.reset();
            return Ok(BatchSummary::empty());
        }

        let total = pending.len();
        log::info!("Processing {} pending files (limit {})", total, limit);
        self.write_log(
            None,
            LogLevel::Info,
            &format!("Processing run started: {} pending files", total),
        );

        let mut summary = BatchSummary::default();
        let mut consecutive_store_failures = 0u32;

        for (idx, record) in pending.iter().enumerate() {
            if self.cancel.is_cancelled() {
                summary.cancelled = true;
                self.progress
                    .emit(&JobProgress::new("processing", idx as u64, total as u64).cancelled());
                log::info!("Run cancelled, {} files left pending", total - idx);
                break;
            }

            if idx > 0 {
                if let Some(held) = lock.as_mut() {
                    if let Err(e) = held.heartbeat() {
                        log::error!("Stopping run, {} files left pending: {}", total - idx, e);
                        self.progress.emit(
                            &JobProgress::new("processing", idx as u64, total as u64).error(e.to_string()),
                        );
                        summary.aborted = Some(e.to_string());
                        break;
                    }
                }
            }

            let outcome = self.process_file(record);
            summary.processed_count += 1;

            let progress = JobProgress::new("processing", (idx + 1) as u64, total as u64)
                .with_message(record.file_name.clone());

            match outcome {
                FileOutcome::Success => {
                    consecutive_store_failures = 0;
                    self.progress.emit(&progress);
                }
                FileOutcome::Failed(reason) => {
                    consecutive_store_failures = 0;
                    summary.failed_count += 1;
                    self.progress.emit(&progress.error(reason));
                }
                FileOutcome::StoreFailed(reason) => {
                    consecutive_store_failures += 1;
                    summary.failed_count += 1;
                    self.progress.emit(&progress.error(reason.clone()));

                    if consecutive_store_failures >= STORE_FAILURE_ABORT_THRESHOLD {
                        return Err(MediaFlowError::StoreUnavailable(format!(
                            "{} consecutive store failures, last: {}",
                            consecutive_store_failures, reason
                        )));
                    }
                }
            }
        }

        summary.message = format!(
            "Processed {} files, {} failed.",
            summary.processed_count, summary.failed_count
        );
        let left = total - summary.processed_count;
        if summary.cancelled {
            summary
                .message
                .push_str(&format!(" Cancelled with {} files still pending.", left));
        } else if let Some(reason) = &summary.aborted {
            summary
                .message
                .push_str(&format!(" Stopped with {} files still pending: {}", left, reason));
        }

        log::info!("{}", summary.message);
        let level = if summary.aborted.is_some() { LogLevel::Warn } else { LogLevel::Info };
        self.write_log(None, level, &summary.message);

        self.cancel.reset();
        if let Some(lock) = lock.take() {
            if let Err(e) = lock.release() {
                log::warn!("Failed to release run lock: {}", e);
            }
        }

        Ok(summary)
    }

    /// Run one file through every stage and settle it in success or failed.
    fn process_file(&self, record: &MediaFileRecord) -> FileOutcome {
        // Durable marker first: a crash from here on leaves the file in processing
        if let Err(e) = self.store.update_status(record.id, FileStatus::Processing) {
            log::error!("Could not start {} (id {}): {}", record.file_name, record.id, e);
            return FileOutcome::StoreFailed(e.to_string());
        }

        let result = self
            .run_stages(record)
            .and_then(|saved| self.store.update_status(record.id, FileStatus::Success).map(|_| saved));

        match result {
            Ok((tier, saved_mb)) => {
                self.write_log(
                    Some(record.id),
                    LogLevel::Info,
                    &format!(
                        "{} for {} ({} tier, saved {:.2} MB)",
                        LOG_SUCCESS_PREFIX,
                        record.file_name,
                        tier.level.as_str(),
                        saved_mb
                    ),
                );
                if saved_mb > 0.0 {
                    self.bump_stat(STAT_STORAGE_SAVED_MB, saved_mb);
                }
                FileOutcome::Success
            }
            Err(e) => self.fail_file(record, &e),
        }
    }

    /// Returns the tier used and the MB saved by compression.
    fn run_stages(&self, record: &MediaFileRecord) -> Result<(CompressionTier, f64)> {
        let id = record.id;
        let now = self.now();
        let age_years = file_age_years(record.created_at()?, now);
        let tier = select_tier(age_years, &self.settings);
        let original = FileRef::original(record);
        let mut upload_source = original.clone();

        log::debug!(
            "{}: age {:.2}y -> {} tier",
            record.file_name,
            age_years,
            tier.level.as_str()
        );

        let compressed_mb = if self.settings.compression_enabled {
            let output = self.stages.compressor.compress(&original, &tier)?;
            if !output.size_mb.is_finite() || output.size_mb < 0.0 {
                return Err(MediaFlowError::Compression(format!(
                    "compressor reported an invalid size: {}",
                    output.size_mb
                )));
            }
            self.store.update_compression(id, output.size_mb, self.now())?;
            if let Some(path) = output.output_path {
                self.store.set_path(id, PathKind::Processed, &path.to_string_lossy())?;
                upload_source = original.with_path(&path);
            }
            output.size_mb
        } else {
            // Pass-through: nothing re-encoded, but the file counts as handled
            self.store.update_compression(id, record.original_size_mb, self.now())?;
            record.original_size_mb
        };

        let ack = self.stages.nas.backup(&original, &self.settings.archive_path())?;
        self.store.update_backup_flag(id, BackupFlag::Nas, true)?;
        if let Some(location) = ack.location {
            self.store.set_path(id, PathKind::Archive, &location)?;
        }

        if self.settings.upload_enabled {
            self.stages
                .cloud
                .upload(&upload_source, &self.settings.cloud_destination())?;
            self.store.update_backup_flag(id, BackupFlag::Cloud, true)?;
        }

        if self.settings.icloud_sync {
            self.stages.icloud.upload(&upload_source)?;
            self.store.update_backup_flag(id, BackupFlag::ICloud, true)?;
        } else {
            self.store.update_backup_flag(id, BackupFlag::ICloud, false)?;
        }

        let saved_mb = ((record.original_size_mb - compressed_mb) * 100.0).round() / 100.0;
        Ok((tier, saved_mb.max(0.0)))
    }

    fn fail_file(&self, record: &MediaFileRecord, err: &MediaFlowError) -> FileOutcome {
        let reason = err.to_string();
        log::warn!("{} (id {}) failed: {}", record.file_name, record.id, reason);

        if let Err(store_err) = self.store.record_failure(record.id, &reason) {
            log::error!(
                "Could not record failure for {} (id {}): {}",
                record.file_name,
                record.id,
                store_err
            );
            return FileOutcome::StoreFailed(format!("{}; then {}", reason, store_err));
        }

        self.write_log(
            Some(record.id),
            LogLevel::Error,
            &format!("{} for {}: {}", LOG_FAILURE_PREFIX, record.file_name, reason),
        );
        self.bump_stat(STAT_PROCESSING_ERRORS, 1.0);

        if err.is_store_error() {
            FileOutcome::StoreFailed(reason)
        } else {
            FileOutcome::Failed(reason)
        }
    }

    // Log rows and counters are bookkeeping; losing one never fails a file.
    fn write_log(&self, file_id: Option<i64>, level: LogLevel, message: &str) {
        if let Err(e) = self.store.append_log(file_id, level, message) {
            log::warn!("Could not write log entry: {}", e);
        }
    }

    fn bump_stat(&self, key: &str, delta: f64) {
        if let Err(e) = self.store.add_to_stat(key, delta) {
            log::warn!("Could not update stat {}: {}", key, e);
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
