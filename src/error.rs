//! Error types for the sbv-rust library.
//!
//! Stream-level and storage failures surface as [`SbvError`]. Problems with a
//! single backup entry are reported as [`ConversionError`] so the parser can
//! log and skip them without aborting the run.

use thiserror::Error;

/// Errors that can occur while importing backups or serving media.
#[derive(Error, Debug)]
pub enum SbvError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The XML reader could not continue
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The document framing is broken (truncated, no root element)
    #[error("Malformed backup document: {0}")]
    MalformedDocument(String),

    /// User identifier rejected before touching the filesystem
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// External codec or image encoder failure
    #[error("Media conversion error: {0}")]
    MediaConversion(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with `SbvError`
pub type Result<T> = std::result::Result<T, SbvError>;

impl From<anyhow::Error> for SbvError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SbvError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        Self::Xml(quick_xml::Error::from(err))
    }
}

impl From<image::ImageError> for SbvError {
    fn from(err: image::ImageError) -> Self {
        Self::MediaConversion(err.to_string())
    }
}

/// A single backup entry that cannot be turned into a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// `date` is missing, not an integer, or outside the representable range
    #[error("invalid timestamp {value:?}")]
    InvalidTimestamp {
        /// Raw attribute value
        value: String,
    },

    /// A core numeric attribute is present but not an integer
    #[error("invalid {field} value {value:?}")]
    InvalidNumber {
        /// Attribute name
        field: &'static str,
        /// Raw attribute value
        value: String,
    },

    /// Attribute markup could not be decoded
    #[error("undecodable attributes: {0}")]
    Attributes(String),
}
