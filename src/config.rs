use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::db::StoreOptions;
use crate::parser::ParserConfig;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Per-user record stores
    pub storage: StorageConfig,
    /// Log output
    pub logging: LoggingConfig,
    /// Parser and auto-import behaviour
    pub import: ImportConfig,
    /// On-demand media conversion
    pub media: MediaConfig,
}

/// Where and how user stores are opened
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Directory holding `sbv_{user}.db` files
    pub db_path_prefix: String,
    /// WAL journaling; disable on network filesystems
    pub use_wal: bool,
    /// Busy timeout for locked databases
    pub busy_timeout_ms: u64,
    /// Connection pool size per store
    pub max_connections: u32,
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Optional rolling JSON log file
    pub file_path: Option<String>,
    /// Console format, "json" or "text"
    pub format: String,
}

/// Parser tuning and the drop-directory watcher
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportConfig {
    /// Root of `{user}/ingest` and `{user}/complete`; defaults under the store prefix
    pub data_dir: Option<String>,
    /// Seconds between scans
    pub check_interval_secs: u64,
    /// Seconds between the two size/mtime samples
    pub stability_wait_secs: u64,
    /// Buffer reclaim cadence for SMS entries
    pub sms_reclaim_interval: u64,
    /// Buffer reclaim cadence for MMS entries
    pub mms_reclaim_interval: u64,
    /// Entries between progress log lines
    pub progress_log_interval: u64,
    /// Temp directory for interactive uploads; system temp when unset
    pub upload_dir: Option<String>,
}

/// External codec settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaConfig {
    /// ffmpeg executable
    pub ffmpeg_path: String,
    /// Upper bound on a single video conversion
    pub conversion_timeout_secs: u64,
    /// JPEG quality for decoded HEIC images
    pub jpeg_quality: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                db_path_prefix: ".".to_string(),
                use_wal: true,
                busy_timeout_ms: 5000,
                max_connections: 4,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                format: "text".to_string(),
            },
            import: ImportConfig {
                data_dir: None,
                check_interval_secs: 60,
                stability_wait_secs: 5,
                sms_reclaim_interval: 1000,
                mms_reclaim_interval: 100,
                progress_log_interval: 10_000,
                upload_dir: None,
            },
            media: MediaConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                conversion_timeout_secs: 300,
                jpeg_quality: 90,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence
    pub fn load() -> Result<Self> {
        let defaults = Config::try_from(&Self::default())
            .map_err(|e| anyhow::anyhow!("Failed to serialize default configuration: {}", e))?;

        let config = Config::builder()
            // Start with default values
            .add_source(defaults)
            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            // SBV_STORAGE__USE_WAL=false and friends
            .add_source(
                Environment::with_prefix("SBV")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        // Validate configuration
        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.storage.busy_timeout_ms == 0 {
            return Err(anyhow::anyhow!("busy_timeout_ms must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.import.check_interval_secs == 0 {
            return Err(anyhow::anyhow!("check_interval_secs must be greater than 0"));
        }
        if self.import.stability_wait_secs == 0 {
            return Err(anyhow::anyhow!("stability_wait_secs must be greater than 0"));
        }
        if self.import.sms_reclaim_interval == 0 || self.import.mms_reclaim_interval == 0 {
            return Err(anyhow::anyhow!("reclaim intervals must be greater than 0"));
        }

        if self.media.ffmpeg_path.trim().is_empty() {
            return Err(anyhow::anyhow!("ffmpeg_path cannot be empty"));
        }
        if self.media.conversion_timeout_secs == 0 {
            return Err(anyhow::anyhow!("conversion_timeout_secs must be greater than 0"));
        }
        if !(1..=100).contains(&self.media.jpeg_quality) {
            return Err(anyhow::anyhow!("jpeg_quality must be between 1 and 100"));
        }

        Ok(())
    }

    /// Store directory from `DB_PATH_PREFIX` or config
    #[must_use]
    pub fn get_db_path_prefix(&self) -> PathBuf {
        std::env::var("DB_PATH_PREFIX")
            .ok()
            .filter(|prefix| !prefix.is_empty())
            .map_or_else(|| PathBuf::from(&self.storage.db_path_prefix), PathBuf::from)
    }

    /// Drop-directory root; `{db prefix}/data` unless configured
    #[must_use]
    pub fn get_data_dir(&self) -> PathBuf {
        self.import
            .data_dir
            .as_ref()
            .map_or_else(|| self.get_db_path_prefix().join("data"), PathBuf::from)
    }

    /// Directory for interactive upload temp files
    #[must_use]
    pub fn get_upload_dir(&self) -> PathBuf {
        self.import.upload_dir.as_ref().map_or_else(
            || std::env::temp_dir().join("sbv-uploads"),
            PathBuf::from,
        )
    }

    /// Connection settings for user stores
    #[must_use]
    pub const fn store_options(&self) -> StoreOptions {
        StoreOptions {
            use_wal: self.storage.use_wal,
            busy_timeout: Duration::from_millis(self.storage.busy_timeout_ms),
            max_connections: self.storage.max_connections,
        }
    }

    /// Parser tuning
    #[must_use]
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig::default()
            .with_sms_reclaim_interval(self.import.sms_reclaim_interval)
            .with_mms_reclaim_interval(self.import.mms_reclaim_interval)
            .with_progress_log_interval(self.import.progress_log_interval)
    }

    /// Scan cadence of the watcher
    #[must_use]
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.import.check_interval_secs)
    }

    /// Pause between stability samples
    #[must_use]
    pub const fn stability_wait(&self) -> Duration {
        Duration::from_secs(self.import.stability_wait_secs)
    }

    /// Upper bound on one external conversion
    #[must_use]
    pub const fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.media.conversion_timeout_secs)
    }
}
