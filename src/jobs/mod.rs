// Job system module: processing runs, the run lock, cancellation and progress

pub mod lock;
pub mod orchestrator;
pub mod progress;
pub mod runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use orchestrator::{BatchSummary, Orchestrator};

/// Shared cancellation signal for one run. Checked between files only; the
/// file in flight always runs to completion or failure.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        is_cancelled(&self.0)
    }

    /// Clear a request once the run it targeted has stopped.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Check if a run has been cancelled.
pub fn is_cancelled(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Relaxed)
}

/// Get worker identifier ("host:pid")
pub fn worker_id() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    format!("{}:{}", hostname, pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared_between_clones() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        assert!(!flag.is_cancelled());
        handle.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_reset_clears_for_every_clone() {
        let flag = CancelFlag::new();
        let handle = flag.clone();
        handle.cancel();
        flag.reset();
        assert!(!handle.is_cancelled());
    }

    #[test]
    fn test_worker_id_has_pid() {
        let id = worker_id();
        assert!(id.ends_with(&format!(":{}", std::process::id())));
    }
}
