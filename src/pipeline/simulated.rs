// Deterministic stage implementations
//
// No I/O. Output sizes follow a fixed ratio per tier and failures happen only
// where a predicate says so, which makes batch behavior reproducible in tests
// and dry runs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Ack, CloudUploader, CompressOutput, Compressor, FileRef, ICloudUploader, NasBackup};
use crate::error::{MediaFlowError, Result};
use crate::policy::{CompressionTier, TierLevel};

type FailWhen = Box<dyn Fn(&FileRef) -> bool + Send + Sync>;

fn lock_calls<T: Clone>(calls: &Mutex<Vec<T>>) -> Vec<T> {
    match calls.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn push_call<T>(calls: &Mutex<Vec<T>>, call: T) {
    match calls.lock() {
        Ok(mut guard) => guard.push(call),
        Err(poisoned) => poisoned.into_inner().push(call),
    }
}

pub struct SimulatedCompressor {
    fixed_ratio: Option<f64>,
    fail_when: Option<FailWhen>,
    calls: Mutex<Vec<(i64, CompressionTier)>>,
}

impl SimulatedCompressor {
    pub fn new() -> Self {
        Self {
            fixed_ratio: None,
            fail_when: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Use one output/input ratio for every tier.
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.fixed_ratio = Some(ratio);
        self
    }

    pub fn fail_when(mut self, predicate: impl Fn(&FileRef) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// (file id, tier) for every call, in call order.
    pub fn calls(&self) -> Vec<(i64, CompressionTier)> {
        lock_calls(&self.calls)
    }

    fn ratio_for(&self, level: TierLevel) -> f64 {
        self.fixed_ratio.unwrap_or(match level {
            TierLevel::Original => 0.8,
            TierLevel::Medium => 0.5,
            TierLevel::Low => 0.3,
        })
    }
}

impl Default for SimulatedCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for SimulatedCompressor {
    fn compress(&self, file: &FileRef, tier: &CompressionTier) -> Result<CompressOutput> {
        push_call(&self.calls, (file.id, *tier));

        if self.fail_when.as_ref().is_some_and(|f| f(file)) {
            return Err(MediaFlowError::Compression(format!(
                "simulated codec failure for {}",
                file.file_name
            )));
        }

        let size_mb = (file.original_size_mb * self.ratio_for(tier.level) * 100.0).round() / 100.0;
        Ok(CompressOutput { size_mb, output_path: None })
    }
}

pub struct SimulatedBackup {
    fail_when: Option<FailWhen>,
    calls: Mutex<Vec<i64>>,
}

impl SimulatedBackup {
    pub fn new() -> Self {
        Self { fail_when: None, calls: Mutex::new(Vec::new()) }
    }

    pub fn fail_when(mut self, predicate: impl Fn(&FileRef) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<i64> {
        lock_calls(&self.calls)
    }
}

impl Default for SimulatedBackup {
    fn default() -> Self {
        Self::new()
    }
}

impl NasBackup for SimulatedBackup {
    fn backup(&self, file: &FileRef, destination: &Path) -> Result<Ack> {
        push_call(&self.calls, file.id);

        if self.fail_when.as_ref().is_some_and(|f| f(file)) {
            return Err(MediaFlowError::Backup(format!(
                "simulated NAS write failure for {}",
                file.file_name
            )));
        }

        Ok(Ack {
            location: Some(destination.join(&file.file_name).to_string_lossy().to_string()),
        })
    }
}

/// Stands in for both the cloud and the iCloud upload stage.
pub struct SimulatedUploader {
    fail_when: Option<FailWhen>,
    calls: Mutex<Vec<i64>>,
}

impl SimulatedUploader {
    pub fn new() -> Self {
        Self { fail_when: None, calls: Mutex::new(Vec::new()) }
    }

    pub fn fail_when(mut self, predicate: impl Fn(&FileRef) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<i64> {
        lock_calls(&self.calls)
    }

    fn attempt(&self, file: &FileRef, destination: &str) -> Result<Ack> {
        push_call(&self.calls, file.id);

        if self.fail_when.as_ref().is_some_and(|f| f(file)) {
            return Err(MediaFlowError::Upload(format!(
                "simulated upload rejected for {}",
                file.file_name
            )));
        }

        Ok(Ack { location: Some(format!("{}/{}", destination, file.file_name)) })
    }
}

impl Default for SimulatedUploader {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudUploader for SimulatedUploader {
    fn upload(&self, file: &FileRef, destination: &str) -> Result<Ack> {
        self.attempt(file, destination)
    }
}

impl ICloudUploader for SimulatedUploader {
    fn upload(&self, file: &FileRef) -> Result<Ack> {
        self.attempt(file, "icloud")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::MediaType;
    use crate::policy::select_tier;
    use crate::settings::Settings;
    use std::path::PathBuf;

    fn file(id: i64, size: f64) -> FileRef {
        FileRef {
            id,
            file_name: format!("clip{}.mp4", id),
            media_type: MediaType::Video,
            original_size_mb: size,
            created_date: "2020-01-01T00:00:00Z".to_string(),
            path: PathBuf::from(format!("/staging/clip{}.mp4", id)),
        }
    }

    #[test]
    fn test_compressor_ratio_by_tier() {
        let settings = Settings::default();
        let compressor = SimulatedCompressor::new();
        let low = compressor.compress(&file(1, 100.0), &select_tier(8.0, &settings)).unwrap();
        let original = compressor.compress(&file(2, 100.0), &select_tier(0.1, &settings)).unwrap();
        assert_eq!(low.size_mb, 30.0);
        assert_eq!(original.size_mb, 80.0);
        assert_eq!(compressor.calls().len(), 2);
    }

    #[test]
    fn test_compressor_failure_predicate() {
        let settings = Settings::default();
        let compressor = SimulatedCompressor::new().fail_when(|f| f.original_size_mb > 500.0);
        let tier = select_tier(2.0, &settings);
        assert!(compressor.compress(&file(1, 20.0), &tier).is_ok());
        let err = compressor.compress(&file(2, 900.0), &tier).unwrap_err();
        assert!(err.is_stage_error());
    }

    #[test]
    fn test_uploader_records_calls() {
        let uploader = SimulatedUploader::new().fail_when(|f| f.id == 2);
        assert!(CloudUploader::upload(&uploader, &file(1, 1.0), "remote:/x").is_ok());
        assert!(ICloudUploader::upload(&uploader, &file(2, 1.0)).is_err());
        assert_eq!(uploader.calls(), vec![1, 2]);
    }
}
