//! Database schema definitions
//!
//! Table and column names used by the query builders in `db.rs`. The DDL itself
//! lives in `migrations/` and is applied when a store is opened.

/// Unified records table schema
pub mod messages {
    /// Table name
    pub const TABLE: &str = "messages";
    /// Primary key column
    pub const ID: &str = "id";
    /// Record kind code (1 SMS, 2 MMS, 3 call)
    pub const RECORD_TYPE: &str = "record_type";
    /// Attachment MIME type column
    pub const MEDIA_TYPE: &str = "media_type";
    /// Attachment payload column
    pub const MEDIA_DATA: &str = "media_data";
}

/// Full-text index over message bodies
pub mod messages_fts {
    /// Virtual table name
    pub const TABLE: &str = "messages_fts";
}

/// Ordered migrations applied to every store
pub const MIGRATIONS: &[(&str, &str)] = &[(
    "2026-01-10-000000_create_messages",
    include_str!("../migrations/2026-01-10-000000_create_messages/up.sql"),
)];
