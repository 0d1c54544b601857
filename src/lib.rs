//! SMS Backup Viewer - Backup Ingestion and Media Pipeline
//!
//! A Rust library for importing Android "SMS Backup & Restore" XML exports
//! into per-user SQLite stores and serving their media attachments.
//!
//! # Features
//!
//! - Streaming XML import of SMS, MMS and call-log entries
//! - Phone number normalization and multi-party conversation keys
//! - Idempotent, deduplicated storage with full-text search
//! - Drop-directory auto-import with per-file logs
//! - On-demand HEIC and video transcoding

/// Phone number normalization
pub mod address;
/// Configuration management
pub mod config;
/// Backup entry to record conversion
pub mod convert;
/// Database operations and connection pooling
pub mod db;
/// Error types
pub mod error;
/// Logging setup and utilities
pub mod logging;
/// Metrics collection
pub mod metrics;
/// Data models and structures
pub mod models;
/// Streaming backup parser
pub mod parser;
/// Upload progress tracking
pub mod progress;
/// Repository pattern for data access
pub mod repository;
/// Database schema definitions
pub mod schema;
/// Record insertion with skip accounting
pub mod sink;
/// Media transcoding
pub mod transcode;
/// Interactive uploads
pub mod upload;
/// Input validation and sanitization
pub mod validation;
/// Drop-directory auto-import
pub mod watcher;

// Re-export key components for easier access
pub use db::{Database, StoreOptions, StoreRegistry};
pub use error::{ConversionError, Result, SbvError};
pub use models::{MediaAttachment, ParseSummary, RecordKind, UnifiedRecord, UploadProgress, UploadStatus};
pub use parser::{BackupParser, ParserConfig};
pub use progress::ProgressTracker;
pub use repository::RecordRepository;
pub use transcode::{MediaTranscoder, ResolvedMedia};
pub use watcher::{AutoImportHandle, AutoImportService, ScanReport};
