//! Interactive uploads
//!
//! The caller saves the incoming stream to a temp file, acknowledges the
//! request, and lets a blocking task run the import. Clients follow along
//! through [`ProgressTracker::snapshot`].

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::StoreRegistry;
use crate::error::{Result, SbvError};
use crate::models::ParseSummary;
use crate::parser::BackupParser;
use crate::progress::ProgressTracker;

/// Copy `reader` into a fresh `backup-*.xml` file under `upload_dir`
pub fn save_uploaded_file<R: Read>(mut reader: R, upload_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(upload_dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix("backup-")
        .suffix(".xml")
        .tempfile_in(upload_dir)?;

    // dropping the NamedTempFile on error removes the partial copy
    let bytes = io::copy(&mut reader, temp.as_file_mut())?;
    temp.as_file().sync_all()?;

    let (_, path) = temp
        .keep()
        .map_err(|e| SbvError::Io(e.error))?;
    info!(path = %path.display(), bytes, "Saved uploaded file");
    Ok(path)
}

/// Import a saved upload into the user's store. The file is always removed.
pub fn process_uploaded_file(
    stores: &StoreRegistry,
    progress: &ProgressTracker,
    parser: &BackupParser,
    user_id: &str,
    path: &Path,
) -> Result<ParseSummary> {
    let result = import_upload(stores, progress, parser, user_id, path);

    if let Err(err) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %err, "Failed to remove uploaded file");
    }

    match &result {
        Ok(summary) => info!(
            user_id,
            messages = summary.messages,
            calls = summary.calls,
            skipped = summary.skipped,
            "Upload processed"
        ),
        Err(err) => error!(user_id, error = %err, "Upload processing failed"),
    }
    result
}

fn import_upload(
    stores: &StoreRegistry,
    progress: &ProgressTracker,
    parser: &BackupParser,
    user_id: &str,
    path: &Path,
) -> Result<ParseSummary> {
    let db = stores.get(user_id).inspect_err(|err| {
        progress.fail(format!("Failed to get user database: {err}"));
    })?;

    let file = File::open(path).inspect_err(|err| {
        progress.fail(format!("Failed to open file: {err}"));
    })?;

    parser
        .parse(BufReader::new(file), &db, progress)
        .inspect_err(|err| {
            progress.fail(format!("Failed to process file: {err}"));
        })
}

/// Run [`process_uploaded_file`] on the blocking pool
pub fn spawn_upload_processing(
    stores: StoreRegistry,
    progress: ProgressTracker,
    parser: BackupParser,
    user_id: String,
    path: PathBuf,
) -> JoinHandle<Result<ParseSummary>> {
    tokio::task::spawn_blocking(move || {
        process_uploaded_file(&stores, &progress, &parser, &user_id, &path)
    })
}
