// MediaFlow Constants
// Defaults mirror the shipped settings.json. Changing them changes behavior for
// every install that never overrode the value.

pub const APP_NAME: &str = "MediaFlow";

// Settings file
pub const APP_CONFIG_DIR: &str = ".mediaflow";
pub const SETTINGS_FILENAME: &str = "settings.json";
pub const SETTINGS_PATH_ENV: &str = "MEDIAFLOW_SETTINGS";

// Default filesystem roots
pub const DEFAULT_STAGING_DIR: &str = "media/staging";
pub const DEFAULT_ARCHIVE_DIR: &str = "media/archive";
pub const DEFAULT_PROCESSED_DIR: &str = "media/processed";
pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFAULT_DB_PATH: &str = "data/media_library.sqlite";

// Remotes
pub const DEFAULT_RCLONE_REMOTE: &str = "gdrive";
pub const DEFAULT_DRIVE_PATH: &str = "/Apps/MediaFlow/processed";
pub const DEFAULT_ICLOUD_REMOTE: &str = "icloud";
pub const DEFAULT_ICLOUD_FOLDER_STRUCTURE: &str = "{:%Y/%m}";

// Processing
pub const DEFAULT_PROCESS_LIMIT: u32 = 1000;
pub const DEFAULT_JPG_QUALITY_MEDIUM: u8 = 75;
pub const DEFAULT_JPG_QUALITY_LOW: u8 = 60;
pub const DEFAULT_VID_CRF_1080P: u8 = 23;
pub const DEFAULT_VID_CRF_720P: u8 = 26;
pub const DEFAULT_VID_CRF_640P: u8 = 28;
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Daily log files in logDir: mediaflow.YYYY-MM-DD.log
pub const LOG_FILE_PREFIX: &str = "mediaflow";
pub const LOG_FILE_SUFFIX: &str = "log";

// x264/x265 CRF scale
pub const MAX_VIDEO_CRF: u8 = 51;

// Tier resolutions (output height in pixels)
pub const TIER_ORIGINAL_HEIGHT: u32 = 1080;
pub const TIER_MEDIUM_HEIGHT: u32 = 720;
pub const TIER_LOW_HEIGHT: u32 = 640;

// Age brackets in years. A file exactly on a boundary stays in the newer bracket.
pub const TIER_MEDIUM_MIN_AGE_YEARS: f64 = 1.0;
pub const TIER_LOW_MIN_AGE_YEARS: f64 = 5.0;
pub const DAYS_PER_YEAR: f64 = 365.25;

// Sizes
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// Hashing
pub const HASH_CHUNK_SIZE: usize = 1_048_576; // 1MB

// Run lock
pub const RUN_LOCK_EXTENSION: &str = "lock";
pub const RUN_LOCK_STALE_SECONDS: i64 = 6 * 60 * 60;

// Consecutive store failures after which the store is treated as unavailable
pub const STORE_FAILURE_ABORT_THRESHOLD: u32 = 3;

// Subprocess polling interval while waiting on a stage with a timeout
pub const STAGE_POLL_INTERVAL_MS: u64 = 200;

// Temp files written next to their final destination
pub const TEMP_FILE_PREFIX: &str = ".mediaflow_tmp_";

// Camera label when no metadata is available
pub const UNKNOWN_CAMERA: &str = "Unknown";

// Aggregate stats keys
pub const STAT_TOTAL_FILES: &str = "total_files";
pub const STAT_STORAGE_SAVED_MB: &str = "storage_saved_mb";
pub const STAT_DUPLICATES_FOUND: &str = "duplicates_found";
pub const STAT_PROCESSING_ERRORS: &str = "processing_errors";

// Log message prefixes (the processing history counts these)
pub const LOG_SUCCESS_PREFIX: &str = "SUCCESS: Processing complete";
pub const LOG_FAILURE_PREFIX: &str = "ERROR: Processing FAILED";

pub const DEFAULT_HISTORY_DAYS: i64 = 7;

// Video extensions
pub const VIDEO_EXTENSIONS: [&str; 14] = [
    "mp4", "mov", "avi", "mkv", "mts", "m2ts", "mpg", "mpeg",
    "wmv", "webm", "3gp", "m4v", "hevc", "ts",
];

// Image extensions
pub const IMAGE_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "gif", "webp", "heic", "heif", "tif", "tiff", "bmp",
];
