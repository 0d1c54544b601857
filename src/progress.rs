//! Progress of the single in-flight import
//!
//! At most one [`UploadProgress`] exists. Starting a new run replaces it.
//! Readers only ever see cloned snapshots, never the live value.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::{UploadProgress, UploadStatus};

/// Shared handle to the current import's progress
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    inner: Arc<Mutex<Option<UploadProgress>>>,
}

impl ProgressTracker {
    /// Create a tracker with no run recorded
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever was tracked with a fresh run in `parsing` state
    pub fn begin(&self) {
        *self.inner.lock() = Some(UploadProgress::started());
    }

    /// Copy of the current progress, if a run was ever started
    #[must_use]
    pub fn snapshot(&self) -> Option<UploadProgress> {
        self.inner.lock().clone()
    }

    /// Forget the current run
    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    /// Seed the message total from the backup root
    pub fn set_declared_messages(&self, total: u64) {
        self.update(|p| p.total_messages = total);
    }

    /// Seed the call total from a call-log backup root
    pub fn set_declared_calls(&self, total: u64) {
        self.update(|p| p.total_calls = total);
    }

    /// One more SMS or MMS handled
    pub fn record_message(&self) {
        self.update(|p| {
            p.processed_messages += 1;
            p.status = UploadStatus::Importing;
        });
    }

    /// One more call handled; the call total grows with it when undeclared
    pub fn record_call(&self) {
        self.update(|p| {
            p.processed_calls += 1;
            p.total_calls = p.total_calls.max(p.processed_calls);
            p.status = UploadStatus::Importing;
        });
    }

    /// Stream consumed; totals collapse onto what was actually processed
    pub fn complete(&self) {
        self.update(|p| {
            p.total_messages = p.processed_messages;
            p.total_calls = p.processed_calls;
            p.status = UploadStatus::Completed;
            p.error_message = None;
        });
    }

    /// Run aborted. Starts a run first if none exists so the error is visible.
    pub fn fail(&self, message: impl Into<String>) {
        let mut guard = self.inner.lock();
        let progress = guard.get_or_insert_with(UploadProgress::started);
        progress.status = UploadStatus::Error;
        progress.error_message = Some(message.into());
    }

    fn update(&self, apply: impl FnOnce(&mut UploadProgress)) {
        if let Some(progress) = self.inner.lock().as_mut() {
            apply(progress);
        }
    }
}
