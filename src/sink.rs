//! Ingestion sink: idempotent writes plus progress accounting
//!
//! The parser hands every converted record to [`IngestionSink`]. A duplicate
//! is a successful write. A store error is logged and the entry counted as
//! skipped so a single bad row never aborts a multi-gigabyte import.

use tracing::error;

use crate::metrics;
use crate::models::UnifiedRecord;
use crate::progress::ProgressTracker;
use crate::repository::RecordRepository;

/// Writes records and advances the matching progress counter
pub struct IngestionSink<'a, R: RecordRepository + ?Sized> {
    repo: &'a R,
    progress: &'a ProgressTracker,
}

impl<'a, R: RecordRepository + ?Sized> IngestionSink<'a, R> {
    /// Wrap a repository and the tracker of the current run
    pub const fn new(repo: &'a R, progress: &'a ProgressTracker) -> Self {
        Self { repo, progress }
    }

    /// Store an SMS or MMS record. Returns whether the write went through.
    pub fn insert_message(&self, record: &UnifiedRecord) -> bool {
        let stored = self.write(record);
        if stored {
            self.progress.record_message();
        }
        stored
    }

    /// Store a call record. Returns whether the write went through.
    pub fn insert_call(&self, record: &UnifiedRecord) -> bool {
        let stored = self.write(record);
        if stored {
            self.progress.record_call();
        }
        stored
    }

    fn write(&self, record: &UnifiedRecord) -> bool {
        match self.repo.insert_record(record) {
            Ok(_) => {
                metrics::record_stored(record.kind);
                true
            }
            Err(err) => {
                error!(
                    kind = record.kind.as_str(),
                    address = %record.address,
                    date = record.unix_seconds(),
                    error = %err,
                    "Error inserting record"
                );
                metrics::record_skipped(record.kind, "store");
                false
            }
        }
    }
}
