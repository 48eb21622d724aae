// Job progress payload and sinks

use serde::Serialize;

/// Progress payload emitted once per file during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub phase: String,
    pub current: u64,
    pub total: u64,
    pub percent: f64,
    pub message: String,
    pub is_cancelled: bool,
    pub is_error: bool,
    pub error_message: Option<String>,
}

impl JobProgress {
    pub fn new(phase: impl Into<String>, current: u64, total: u64) -> Self {
        let total_safe = total.max(1);
        let percent = (current as f64 / total_safe as f64) * 100.0;
        Self {
            phase: phase.into(),
            current,
            total,
            percent: percent.min(100.0),
            message: String::new(),
            is_cancelled: false,
            is_error: false,
            error_message: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = msg.into();
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.is_cancelled = true;
        self
    }

    pub fn error(mut self, msg: impl Into<String>) -> Self {
        self.is_error = true;
        self.error_message = Some(msg.into());
        self
    }
}

/// Receives progress events from a run.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, progress: &JobProgress);
}

/// Writes progress to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, progress: &JobProgress) {
        if progress.is_error {
            log::warn!(
                "[{}/{}] {} failed: {}",
                progress.current,
                progress.total,
                progress.message,
                progress.error_message.as_deref().unwrap_or("unknown error")
            );
        } else if progress.is_cancelled {
            log::info!("[{}/{}] cancelled", progress.current, progress.total);
        } else {
            log::info!(
                "[{}/{}] {:.0}% {} {}",
                progress.current,
                progress.total,
                progress.percent,
                progress.phase,
                progress.message
            );
        }
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _progress: &JobProgress) {}
}
