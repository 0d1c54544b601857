//! Comprehensive unit tests for upload.rs module

use std::fs;
use std::io::{self, Cursor, Read};

use sbv_rust::db::{StoreOptions, StoreRegistry};
use sbv_rust::models::UploadStatus;
use sbv_rust::parser::BackupParser;
use sbv_rust::progress::ProgressTracker;
use sbv_rust::upload::{process_uploaded_file, save_uploaded_file, spawn_upload_processing};

const BACKUP: &str = r#"<smses count="2">
  <sms address="5551234567" date="1700000000000" type="1" body="uploaded one" />
  <sms address="5551234567" date="1700000001000" type="2" body="uploaded two" />
</smses>"#;

/// Yields a few bytes, then fails
struct FailingReader {
    sent: bool,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.sent {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away"));
        }
        self.sent = true;
        let chunk = b"<smses>";
        buf[..chunk.len()].copy_from_slice(chunk);
        Ok(chunk.len())
    }
}

#[test]
fn test_save_uploaded_file_names_and_contents() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let upload_dir = dir.path().join("uploads");

    let path = save_uploaded_file(Cursor::new(BACKUP), &upload_dir).expect("save");

    let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
    assert!(name.starts_with("backup-"));
    assert!(name.ends_with(".xml"));
    assert_eq!(fs::read_to_string(&path).expect("read"), BACKUP);
}

#[test]
fn test_failed_copy_leaves_no_temp_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");

    let result = save_uploaded_file(FailingReader { sent: false }, dir.path());
    assert!(result.is_err());
    assert_eq!(fs::read_dir(dir.path()).expect("read dir").count(), 0);
}

#[test]
fn test_process_uploaded_file_imports_and_removes_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let stores = StoreRegistry::new(dir.path().join("stores"), StoreOptions::default());
    let progress = ProgressTracker::new();
    let path = save_uploaded_file(Cursor::new(BACKUP), &dir.path().join("uploads")).expect("save");

    let summary = process_uploaded_file(&stores, &progress, &BackupParser::default(), "alice", &path)
        .expect("process");

    assert_eq!(summary.messages, 2);
    assert!(!path.exists());
    assert_eq!(stores.get("alice").expect("store").count_records(None).expect("count"), 2);
    assert_eq!(progress.snapshot().expect("progress").status, UploadStatus::Completed);
}

#[test]
fn test_process_failure_still_removes_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let stores = StoreRegistry::new(dir.path().join("stores"), StoreOptions::default());
    let progress = ProgressTracker::new();
    let path = save_uploaded_file(Cursor::new("<smses><sms"), &dir.path().join("uploads"))
        .expect("save");

    let result = process_uploaded_file(&stores, &progress, &BackupParser::default(), "alice", &path);

    assert!(result.is_err());
    assert!(!path.exists());
    let snapshot = progress.snapshot().expect("progress");
    assert_eq!(snapshot.status, UploadStatus::Error);
    assert!(snapshot
        .error_message
        .expect("error message")
        .starts_with("Failed to process file:"));
}

#[test]
fn test_invalid_user_reports_store_failure() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let stores = StoreRegistry::new(dir.path().join("stores"), StoreOptions::default());
    let progress = ProgressTracker::new();
    let path = save_uploaded_file(Cursor::new(BACKUP), &dir.path().join("uploads")).expect("save");

    let result = process_uploaded_file(&stores, &progress, &BackupParser::default(), "../nope", &path);

    assert!(result.is_err());
    assert!(!path.exists());
    let message = progress
        .snapshot()
        .and_then(|p| p.error_message)
        .expect("error message");
    assert!(message.starts_with("Failed to get user database:"));
}

#[tokio::test]
async fn test_spawned_processing_reports_progress() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let stores = StoreRegistry::new(dir.path().join("stores"), StoreOptions::default());
    let progress = ProgressTracker::new();
    let path = save_uploaded_file(Cursor::new(BACKUP), &dir.path().join("uploads")).expect("save");

    let handle = spawn_upload_processing(
        stores.clone(),
        progress.clone(),
        BackupParser::default(),
        "bob".to_string(),
        path.clone(),
    );
    let summary = handle.await.expect("join").expect("process");

    assert_eq!(summary.messages, 2);
    assert!(!path.exists());
    let snapshot = progress.snapshot().expect("progress");
    assert!(snapshot.is_finished());
    assert_eq!(snapshot.processed_messages, 2);
}
