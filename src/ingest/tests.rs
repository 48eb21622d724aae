// Ingest scenarios against an in-memory store and a temp staging dir

use super::*;
use crate::db::open_memory_db;
use crate::db::schema::{self, FileStatus, MediaType};
use crate::store::SqliteStore;
use std::path::Path;
use tempfile::TempDir;

fn setup_store() -> SqliteStore {
    SqliteStore::new(open_memory_db().unwrap())
}

fn create_staging_files(dir: &Path, files: &[(&str, &[u8])]) {
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
}

#[test]
fn test_ingest_queues_new_files_as_pending() {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    create_staging_files(
        &staging,
        &[
            ("2019-07-04 Birthday/IMG_0001.jpg", b"first photo"),
            ("2019-07-04 Birthday/MVI_0002.mov", b"first video"),
            ("readme.txt", b"not media"),
        ],
    );
    let store = setup_store();

    let result = ingest_dir(&store, &staging, false).unwrap();
    assert_eq!(
        result,
        IngestResult { total_files: 2, inserted: 2, duplicates: 0, already_known: 0, failed: 0 }
    );

    let pending = store.list_pending(10).unwrap();
    assert_eq!(pending.len(), 2);
    for record in &pending {
        assert_eq!(record.status, FileStatus::Pending);
        assert_eq!(record.created_date, "2019-07-04T00:00:00Z");
        assert_eq!(record.camera, "Unknown");
        assert!(record.file_hash.starts_with("blake3:"));
        assert!(Path::new(&record.staging_path).is_file());
    }

    let video = pending.iter().find(|r| r.file_name == "MVI_0002.mov").unwrap();
    assert_eq!(video.media_type, MediaType::Video);
}

#[test]
fn test_reingesting_same_content_is_noop() {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    create_staging_files(
        &staging,
        &[
            ("a/IMG_1.jpg", b"same bytes"),
            ("b/IMG_1_copy.jpg", b"same bytes"),
            ("c/IMG_2.jpg", b"other bytes"),
        ],
    );
    let store = setup_store();

    let first = ingest_dir(&store, &staging, false).unwrap();
    assert_eq!(first.inserted, 2);
    assert_eq!(first.duplicates, 1);

    let second = ingest_dir(&store, &staging, false).unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 0);
    assert_eq!(second.already_known, 3);

    assert_eq!(store.count_by_status(FileStatus::Pending).unwrap(), 2);

    // The first path in discovery order owns the shared content
    let hash = crate::hash::compute_file_hash(&staging.join("a/IMG_1.jpg")).unwrap();
    let owner = schema::find_file_by_hash(store.conn(), &hash).unwrap().unwrap();
    assert_eq!(owner.file_name, "IMG_1.jpg");

    let stats = schema::get_stats(store.conn()).unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.duplicates_found, 1);
}

#[test]
fn test_rescans_do_not_inflate_duplicate_count() {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    let files: Vec<(String, Vec<u8>)> =
        (0..5).map(|i| (format!("IMG_{}.jpg", i), format!("photo {}", i).into_bytes())).collect();
    let refs: Vec<(&str, &[u8])> = files.iter().map(|(n, b)| (n.as_str(), b.as_slice())).collect();
    create_staging_files(&staging, &refs);
    let store = setup_store();

    for _ in 0..4 {
        ingest_dir(&store, &staging, false).unwrap();
    }

    let stats = schema::get_stats(store.conn()).unwrap();
    assert_eq!(stats.total_files, 5);
    assert_eq!(stats.duplicates_found, 0);
    assert_eq!(schema::recompute_stats(store.conn()).unwrap(), stats);
}

#[test]
fn test_ingest_writes_log_entries() {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    create_staging_files(&staging, &[("IMG_9.jpg", b"pixels")]);
    let store = setup_store();

    ingest_dir(&store, &staging, false).unwrap();

    let record = schema::find_file_by_name(store.conn(), "IMG_9.jpg").unwrap().unwrap();
    let logs = schema::list_logs_for_file(store.conn(), record.id).unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].message.starts_with("Queued IMG_9.jpg"));
}

#[test]
fn test_empty_staging_dir() {
    let tmp = TempDir::new().unwrap();
    let store = setup_store();

    let result = ingest_dir(&store, &tmp.path().join("missing"), false).unwrap();
    assert_eq!(result, IngestResult::default());
    assert!(store.list_pending(10).unwrap().is_empty());
}

#[test]
fn test_size_is_recorded_in_megabytes() {
    let tmp = TempDir::new().unwrap();
    let staging = tmp.path().join("staging");
    let two_mb = vec![7u8; 2 * 1024 * 1024];
    create_staging_files(&staging, &[("big.mp4", two_mb.as_slice())]);
    let store = setup_store();

    ingest_dir(&store, &staging, false).unwrap();
    let record = store.list_pending(1).unwrap().remove(0);
    assert_eq!(record.original_size_mb, 2.0);
}
