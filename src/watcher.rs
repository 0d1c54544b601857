//! Drop-directory auto-importer
//!
//! Each user owns `{data_dir}/{user}/ingest/`. Files copied there are picked
//! up on the next scan once their size and modification time stop changing,
//! imported through the streaming parser, and moved to
//! `{data_dir}/{user}/complete/` together with a companion `.log` file.
//! Failed imports stay in place and are retried on later scans.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::Local;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db::StoreRegistry;
use crate::metrics;
use crate::parser::BackupParser;
use crate::progress::ProgressTracker;
use crate::validation::InputValidator;

const INGEST_DIR: &str = "ingest";
const COMPLETE_DIR: &str = "complete";
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// What happened to one candidate file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Still being written; looked at again next scan
    Unstable,
    /// Not a format the importer understands; left in place
    Unsupported,
    /// Imported and relocated
    Imported {
        /// Final location under `complete/`
        completed_path: PathBuf,
    },
    /// Import or relocation failed; left in place
    Failed {
        /// Human-readable cause, also written to the companion log
        reason: String,
    },
}

/// Files touched by one scan, grouped by outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Imported and moved to `complete/`
    pub imported: Vec<PathBuf>,
    /// Left in `ingest/` after a failure
    pub failed: Vec<PathBuf>,
    /// Skipped because they were still changing
    pub unstable: Vec<PathBuf>,
    /// Skipped because of their type
    pub unsupported: Vec<PathBuf>,
}

impl ScanReport {
    /// Whether the scan did nothing at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.imported.is_empty()
            && self.failed.is_empty()
            && self.unstable.is_empty()
            && self.unsupported.is_empty()
    }

    fn record(&mut self, path: PathBuf, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Unstable => self.unstable.push(path),
            FileOutcome::Unsupported => self.unsupported.push(path),
            FileOutcome::Imported { .. } => self.imported.push(path),
            FileOutcome::Failed { .. } => self.failed.push(path),
        }
    }
}

/// Size and modification time of a file at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Length in bytes
    pub len: u64,
    /// Modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl FileSnapshot {
    /// Stat `path`
    pub fn capture(path: &Path) -> io::Result<Self> {
        let meta = fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }
}

/// Two samples `wait` apart must agree on size and mtime.
///
/// Any stat failure counts as unstable.
#[must_use]
pub fn is_file_stable(path: &Path, wait: Duration) -> bool {
    let Ok(before) = FileSnapshot::capture(path) else {
        return false;
    };
    thread::sleep(wait);
    FileSnapshot::capture(path).is_ok_and(|after| after == before)
}

/// Polls every user's ingest directory and imports what it finds
#[derive(Debug)]
pub struct AutoImportService {
    data_dir: PathBuf,
    check_interval: Duration,
    stability_wait: Duration,
    stores: StoreRegistry,
    progress: ProgressTracker,
    parser: BackupParser,
}

impl AutoImportService {
    /// Service over `data_dir` with the default one-minute cadence
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, stores: StoreRegistry, progress: ProgressTracker) -> Self {
        Self {
            data_dir: data_dir.into(),
            check_interval: Duration::from_secs(60),
            stability_wait: Duration::from_secs(5),
            stores,
            progress,
            parser: BackupParser::default(),
        }
    }

    /// Service configured from the import section
    #[must_use]
    pub fn from_config(config: &AppConfig, stores: StoreRegistry, progress: ProgressTracker) -> Self {
        Self::new(config.get_data_dir(), stores, progress)
            .with_check_interval(config.check_interval())
            .with_stability_wait(config.stability_wait())
            .with_parser(BackupParser::new(config.parser_config()))
    }

    /// Time between scans, never shorter than 10ms
    #[must_use]
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(MIN_CHECK_INTERVAL);
        self
    }

    /// Time between the two stability samples
    #[must_use]
    pub const fn with_stability_wait(mut self, wait: Duration) -> Self {
        self.stability_wait = wait;
        self
    }

    /// Parser used for every import
    #[must_use]
    pub const fn with_parser(mut self, parser: BackupParser) -> Self {
        self.parser = parser;
        self
    }

    /// Effective time between scans
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        self.check_interval
    }

    /// Root of the per-user directories
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Run the scan loop on the tokio runtime: once now, then every interval.
    ///
    /// Dropping the handle without calling [`AutoImportHandle::stop`] also
    /// stops the loop after the current scan.
    #[must_use]
    pub fn start(self: Arc<Self>) -> AutoImportHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let service = self;

        let task = tokio::spawn(async move {
            info!(
                check_interval = ?service.check_interval,
                data_dir = %service.data_dir.display(),
                "Starting auto-import service"
            );
            let mut ticker = tokio::time::interval(service.check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let scanner = Arc::clone(&service);
                        match tokio::task::spawn_blocking(move || scanner.scan_all_users()).await {
                            Ok(report) if !report.is_empty() => info!(
                                imported = report.imported.len(),
                                failed = report.failed.len(),
                                unstable = report.unstable.len(),
                                unsupported = report.unsupported.len(),
                                "Auto-import scan finished"
                            ),
                            Ok(_) => debug!("Auto-import scan found nothing"),
                            Err(err) => error!(error = %err, "Auto-import scan aborted"),
                        }
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Auto-import service stopped");
        });

        AutoImportHandle { shutdown, task }
    }

    /// Scan every user directory once. Blocking.
    pub fn scan_all_users(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(data_dir = %self.data_dir.display(), error = %err, "Failed to read data directory");
                return report;
            }
        };

        let mut users: Vec<String> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        users.sort();

        for user_id in users {
            if let Err(err) = InputValidator::validate_user_id(&user_id) {
                warn!(user_id, error = %err, "Skipping directory with invalid user id");
                continue;
            }
            self.scan_user_directory(&user_id, &mut report);
        }
        report
    }

    /// Scan one user's ingest directory, creating it if missing
    pub fn scan_user_directory(&self, user_id: &str, report: &mut ScanReport) {
        let ingest_dir = self.data_dir.join(user_id).join(INGEST_DIR);

        if !ingest_dir.exists() {
            if let Err(err) = fs::create_dir_all(&ingest_dir) {
                error!(user_id, error = %err, "Failed to create ingest directory");
            }
            return;
        }

        let entries = match fs::read_dir(&ingest_dir) {
            Ok(entries) => entries,
            Err(err) => {
                error!(user_id, error = %err, "Failed to read ingest directory");
                return;
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .filter(|path| InputValidator::is_import_candidate(path))
            .collect();
        candidates.sort();

        for path in candidates {
            let outcome = self.process_file(user_id, &path);
            report.record(path, &outcome);
        }
    }

    /// Stability check, import and relocation of a single file
    pub fn process_file(&self, user_id: &str, path: &Path) -> FileOutcome {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !is_file_stable(path, self.stability_wait) {
            debug!(user_id, file = %file_name, "File not stable yet, skipping");
            return FileOutcome::Unstable;
        }

        info!(user_id, file = %file_name, "Processing file for import");

        let log_path = companion_log_path(path);
        let mut log = match ImportLog::create(&log_path, user_id, &file_name) {
            Ok(log) => log,
            Err(err) => {
                error!(user_id, file = %file_name, error = %err, "Failed to create log file");
                metrics::record_import_file("failed");
                return FileOutcome::Failed {
                    reason: format!("failed to create log file: {err}"),
                };
            }
        };

        log.log(&format!("Starting import of {file_name}"));
        let started = Instant::now();

        if !InputValidator::is_supported_backup(path) {
            log.log("ERROR: Unsupported file type");
            warn!(user_id, file = %file_name, "Unsupported file type");
            metrics::record_import_file("unsupported");
            return FileOutcome::Unsupported;
        }
        log.log("Detected XML backup file");

        if let Err(reason) = self.import_xml(user_id, path, &mut log) {
            log.log(&format!("ERROR: Import failed: {reason}"));
            log.log("File will remain in ingest directory for manual review");
            log.log(&format!("Import duration: {:.2?}", started.elapsed()));
            error!(user_id, file = %file_name, error = %reason, "Import failed");
            metrics::record_import_file("failed");
            return FileOutcome::Failed { reason };
        }

        let outcome = self.relocate(user_id, path, &log_path, log, started.elapsed());
        metrics::record_import_file(match outcome {
            FileOutcome::Imported { .. } => "imported",
            _ => "failed",
        });
        outcome
    }

    fn import_xml(&self, user_id: &str, path: &Path, log: &mut ImportLog) -> Result<(), String> {
        let db = self
            .stores
            .get(user_id)
            .map_err(|e| format!("failed to get user database: {e}"))?;

        log.log("Parsing XML backup file");
        if let Ok(meta) = fs::metadata(path) {
            log.log(&format!("File size: {} bytes", meta.len()));
        }

        let summary = self
            .parser
            .parse_file(path, &db, &self.progress)
            .map_err(|e| format!("failed to parse backup: {e}"))?;

        log.log("Import statistics:");
        log.log(&format!("Messages processed: {}", summary.messages));
        log.log(&format!("Calls processed: {}", summary.calls));
        log.log(&format!("Entries skipped: {}", summary.skipped));
        Ok(())
    }

    fn relocate(
        &self,
        user_id: &str,
        path: &Path,
        log_path: &Path,
        mut log: ImportLog,
        elapsed: Duration,
    ) -> FileOutcome {
        let complete_dir = self.data_dir.join(user_id).join(COMPLETE_DIR);
        if let Err(err) = fs::create_dir_all(&complete_dir) {
            log.log(&format!("ERROR: Failed to create complete directory: {err}"));
            error!(user_id, error = %err, "Failed to create complete directory");
            return FileOutcome::Failed {
                reason: format!("failed to create complete directory: {err}"),
            };
        }

        let completed_path = unique_destination(&complete_dir, path);
        if let Err(err) = fs::rename(path, &completed_path) {
            log.log(&format!("ERROR: Failed to move file to complete directory: {err}"));
            log.log("File will remain in ingest directory for manual review");
            error!(user_id, error = %err, "Failed to move file");
            return FileOutcome::Failed {
                reason: format!("failed to move file: {err}"),
            };
        }

        log.log(&format!("Import completed successfully in {elapsed:.2?}"));
        log.log(&format!("File moved to: {}", completed_path.display()));

        drop(log);
        if let Err(err) = fs::rename(log_path, companion_log_path(&completed_path)) {
            warn!(user_id, error = %err, "Failed to move log file");
        }

        info!(
            user_id,
            file = %completed_path.display(),
            duration_ms = elapsed.as_millis(),
            "Import completed"
        );
        FileOutcome::Imported { completed_path }
    }
}

/// Running auto-import loop
#[derive(Debug)]
pub struct AutoImportHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AutoImportHandle {
    /// Signal shutdown and wait for the in-flight scan, if any, to finish
    pub async fn stop(self) {
        info!("Stopping auto-import service");
        if self.shutdown.send(true).is_err() {
            debug!("Auto-import loop already exited");
        }
        if let Err(err) = self.task.await {
            error!(error = %err, "Auto-import task ended abnormally");
        }
    }

    /// Whether the loop has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Per-attempt log written beside the imported file
struct ImportLog {
    file: File,
    user_id: String,
    file_name: String,
}

impl ImportLog {
    fn create(path: &Path, user_id: &str, file_name: &str) -> io::Result<Self> {
        Ok(Self {
            file: File::create(path)?,
            user_id: user_id.to_string(),
            file_name: file_name.to_string(),
        })
    }

    /// Append `[YYYY-MM-DD HH:MM:SS] message` and flush it to disk
    fn log(&mut self, message: &str) {
        let message = InputValidator::sanitize_text(message);
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let written = writeln!(self.file, "[{timestamp}] {message}")
            .and_then(|()| self.file.sync_data());
        if let Err(err) = written {
            warn!(user_id = %self.user_id, file = %self.file_name, error = %err, "Failed to write import log");
        }
        info!(user_id = %self.user_id, file = %self.file_name, entry = %message, "Auto-import");
    }
}

/// `backup.xml` -> `backup.xml.log`
fn companion_log_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".log");
    PathBuf::from(name)
}

/// `complete/name.ext`, or `complete/name_YYYYMMDD_HHMMSS.ext` when taken
pub fn unique_destination(complete_dir: &Path, source: &Path) -> PathBuf {
    let file_name = source.file_name().map(OsString::from).unwrap_or_default();
    let candidate = complete_dir.join(&file_name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");

    let stamped = complete_dir.join(format!("{stem}_{timestamp}{ext}"));
    if !stamped.exists() {
        return stamped;
    }
    // same second as an earlier import of the same name
    (2u32..)
        .map(|n| complete_dir.join(format!("{stem}_{timestamp}_{n}{ext}")))
        .find(|path| !path.exists())
        .unwrap_or(stamped)
}
