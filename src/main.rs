use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sbv_rust::config::AppConfig;
use sbv_rust::db::StoreRegistry;
use sbv_rust::logging::{init_logging, OperationTimer};
use sbv_rust::parser::BackupParser;
use sbv_rust::progress::ProgressTracker;
use sbv_rust::transcode::MediaTranscoder;
use sbv_rust::upload::{save_uploaded_file, spawn_upload_processing};
use sbv_rust::validation::InputValidator;
use sbv_rust::watcher::AutoImportService;
use tracing::{info, warn};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Use the rollback journal instead of WAL (network filesystems)
    #[arg(long, global = true)]
    journal: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a backup file directly into a user's store
    Import {
        /// User that owns the store
        #[arg(short, long)]
        user: String,

        /// Backup XML file
        file: PathBuf,
    },
    /// Stage a backup as an upload and follow its progress
    Upload {
        /// User that owns the store
        #[arg(short, long)]
        user: String,

        /// Backup XML file
        file: PathBuf,
    },
    /// Watch every user's ingest directory until interrupted
    Watch {
        /// Override the configured data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Export one record's attachment, transcoded for display
    Media {
        /// User that owns the store
        #[arg(short, long)]
        user: String,

        /// Record id
        #[arg(long)]
        id: i64,

        /// Destination file
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let mut config = AppConfig::load()?;

    // Parse command line arguments
    let cli = Cli::parse();
    if cli.journal {
        config.storage.use_wal = false;
    }

    // Initialize logging; the guard flushes the file writer on exit
    let _log_guard = init_logging(&config.logging)?;

    info!("Starting sbv application");

    let stores = StoreRegistry::new(config.get_db_path_prefix(), config.store_options());
    let progress = ProgressTracker::new();
    let parser = BackupParser::new(config.parser_config());

    match cli.command {
        Commands::Import { user, file } => import_backup(&stores, &progress, &parser, &user, &file)?,
        Commands::Upload { user, file } => upload_backup(&config, stores, progress, parser, user, &file).await?,
        Commands::Watch { data_dir } => {
            if let Some(dir) = data_dir {
                config.import.data_dir = Some(dir.to_string_lossy().into_owned());
            }
            watch(&config, stores, progress).await?;
        }
        Commands::Media { user, id, output } => export_media(&config, &stores, &user, id, &output)?,
    }

    Ok(())
}

/// Import a backup file synchronously
fn import_backup(
    stores: &StoreRegistry,
    progress: &ProgressTracker,
    parser: &BackupParser,
    user_id: &str,
    file: &Path,
) -> Result<()> {
    InputValidator::validate_user_id(user_id)?;
    let timer = OperationTimer::new("import_backup");

    let db = stores.get(user_id).context("Failed to open user store")?;
    let summary = parser
        .parse_file(file, &db, progress)
        .with_context(|| format!("Failed to import {}", file.display()))?;

    timer.finish();
    println!(
        "Imported {} messages and {} calls ({} skipped)",
        summary.messages, summary.calls, summary.skipped
    );
    Ok(())
}

/// Save the file as an upload, process it in the background, and report progress
async fn upload_backup(
    config: &AppConfig,
    stores: StoreRegistry,
    progress: ProgressTracker,
    parser: BackupParser,
    user_id: String,
    file: &Path,
) -> Result<()> {
    InputValidator::validate_user_id(&user_id)?;

    let source = File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let staged = save_uploaded_file(source, &config.get_upload_dir())
        .context("Failed to save uploaded file")?;

    let handle = spawn_upload_processing(stores, progress.clone(), parser, user_id, staged);

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    while !handle.is_finished() {
        ticker.tick().await;
        if let Some(snapshot) = progress.snapshot() {
            info!(
                status = ?snapshot.status,
                processed_messages = snapshot.processed_messages,
                processed_calls = snapshot.processed_calls,
                percentage = snapshot.percentage(),
                "Upload progress"
            );
        }
    }

    let summary = handle.await.context("Upload task panicked")??;
    if let Some(snapshot) = progress.snapshot() {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    println!(
        "Imported {} messages and {} calls ({} skipped)",
        summary.messages, summary.calls, summary.skipped
    );
    Ok(())
}

/// Run the auto-import loop until Ctrl-C
async fn watch(
    config: &AppConfig,
    stores: StoreRegistry,
    progress: ProgressTracker,
) -> Result<()> {
    let service = AutoImportService::from_config(config, stores, progress);
    std::fs::create_dir_all(service.data_dir())
        .with_context(|| format!("Failed to create {}", service.data_dir().display()))?;

    let handle = Arc::new(service).start();
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.stop().await;
    Ok(())
}

/// Write a record's attachment, converted for display
fn export_media(config: &AppConfig, stores: &StoreRegistry, user_id: &str, id: i64, output: &Path) -> Result<()> {
    let db = stores.get(user_id).context("Failed to open user store")?;
    let Some(media) = db.get_media(id)? else {
        warn!(user_id, id, "No media stored for record");
        anyhow::bail!("record {id} has no media");
    };

    let transcoder = MediaTranscoder::from_config(&config.media);
    let resolved = transcoder.resolve(&media.data, &media.mime_type);
    std::fs::write(output, &resolved.data)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("{} ({} bytes) -> {}", resolved.mime_type, resolved.data.len(), output.display());
    Ok(())
}
