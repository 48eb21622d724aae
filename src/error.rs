// MediaFlow Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaFlowError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("A processing run is already in progress: {0}")]
    RunInProgress(String),

    #[error("Run lock lost: {0}")]
    RunLockLost(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hash error: {0}")]
    Hash(String),

    #[error("ExifTool error: {0}")]
    ExifTool(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl MediaFlowError {
    /// Compression, backup and upload failures. These are recorded against the
    /// file and never stop the batch.
    pub fn is_stage_error(&self) -> bool {
        matches!(
            self,
            MediaFlowError::Compression(_) | MediaFlowError::Backup(_) | MediaFlowError::Upload(_)
        )
    }

    /// Failures to persist or read state.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            MediaFlowError::Database(_) | MediaFlowError::Store(_) | MediaFlowError::StoreUnavailable(_)
        )
    }
}

impl From<anyhow::Error> for MediaFlowError {
    fn from(err: anyhow::Error) -> Self {
        MediaFlowError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MediaFlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(MediaFlowError::Compression("bad codec".into()).is_stage_error());
        assert!(MediaFlowError::Upload("401".into()).is_stage_error());
        assert!(!MediaFlowError::Config("missing".into()).is_stage_error());
        assert!(MediaFlowError::Store("no rows".into()).is_store_error());
        assert!(!MediaFlowError::Backup("nas offline".into()).is_store_error());
        assert!(!MediaFlowError::RunLockLost("lock file removed".into()).is_store_error());
    }

    #[test]
    fn test_display_includes_reason() {
        let err = MediaFlowError::Compression("unsupported format".into());
        assert_eq!(err.to_string(), "Compression error: unsupported format");
    }
}
