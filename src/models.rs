//! Data models for backup records and import state
//!
//! This module contains the unified record persisted for every SMS, MMS and
//! call entry, the dedup key derived from it, and the progress/summary types
//! reported by an import run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which backup entry shape produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// Plain text message
    Sms,
    /// Multimedia message
    Mms,
    /// Call log entry
    Call,
}

impl RecordKind {
    /// Value stored in the `record_type` column
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Sms => 1,
            Self::Mms => 2,
            Self::Call => 3,
        }
    }

    /// Short label used in logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Mms => "mms",
            Self::Call => "call",
        }
    }

    /// Whether the record counts towards the message totals
    #[must_use]
    pub const fn is_message(self) -> bool {
        matches!(self, Self::Sms | Self::Mms)
    }
}

/// Direction codes as written by the backup tool.
///
/// Messages and calls share the integer column but not the meaning.
pub mod direction {
    /// Message received
    pub const MESSAGE_RECEIVED: i32 = 1;
    /// Message sent
    pub const MESSAGE_SENT: i32 = 2;
    /// Draft
    pub const MESSAGE_DRAFT: i32 = 3;
    /// Waiting in the outbox
    pub const MESSAGE_OUTBOX: i32 = 4;
    /// Failed to send
    pub const MESSAGE_FAILED: i32 = 5;
    /// Queued for sending
    pub const MESSAGE_QUEUED: i32 = 6;

    /// Incoming call
    pub const CALL_INCOMING: i32 = 1;
    /// Outgoing call
    pub const CALL_OUTGOING: i32 = 2;
    /// Missed call
    pub const CALL_MISSED: i32 = 3;
    /// Voicemail
    pub const CALL_VOICEMAIL: i32 = 4;
    /// Rejected call
    pub const CALL_REJECTED: i32 = 5;
    /// Refused (blocked) call
    pub const CALL_REFUSED: i32 = 6;
}

/// Single binary attachment carried by an MMS record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    /// MIME type as declared by the part
    pub mime_type: String,
    /// Decoded payload
    pub data: Vec<u8>,
}

/// One normalized row produced from an SMS, MMS or call entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedRecord {
    /// Entry shape; never changes after conversion
    pub kind: RecordKind,
    /// Normalized participant key (sorted comma-joined list for group MMS)
    pub address: String,
    /// Sorted, deduplicated set of every normalized participant
    pub participant_addresses: Vec<String>,
    /// Originating address for received messages, when known
    pub sender: Option<String>,
    /// Message text; empty for calls
    pub body: String,
    /// Direction code, see [`direction`]
    pub direction_type: i32,
    /// Instant of the entry, truncated to whole seconds
    pub timestamp: DateTime<Utc>,
    /// Whether the message was marked read
    pub read: bool,
    /// First qualifying media or contact-card part
    pub media: Option<MediaAttachment>,
    /// Call length in seconds; zero for messages
    pub duration: i64,
    /// Conversation thread id from the device
    pub thread_id: i64,
    /// Subject line with literal "null" removed
    pub subject: String,
    /// SMS protocol identifier
    pub protocol: i64,
    /// SMS delivery status
    pub status: i64,
    /// SMSC address
    pub service_center: String,
    /// SIM subscription id for messages
    pub sub_id: i64,
    /// Contact display name exported by the device
    pub contact_name: String,
    /// MMS `ct_t` content type; empty for SMS and calls
    pub content_type: String,
    /// MMS read-report flag
    pub read_report: i64,
    /// MMS read status
    pub read_status: i64,
    /// MMS message id (`m_id`)
    pub message_id: String,
    /// MMS message size
    pub message_size: i64,
    /// MMS PDU type
    pub message_type: i64,
    /// SIM slot
    pub sim_slot: i64,
    /// Call number presentation
    pub presentation: i64,
    /// Call subscription id
    pub subscription_id: String,
}

impl UnifiedRecord {
    /// Create a record with every passthrough field empty
    #[must_use]
    pub fn new(kind: RecordKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            address: String::new(),
            participant_addresses: Vec::new(),
            sender: None,
            body: String::new(),
            direction_type: 0,
            timestamp,
            read: false,
            media: None,
            duration: 0,
            thread_id: 0,
            subject: String::new(),
            protocol: 0,
            status: 0,
            service_center: String::new(),
            sub_id: 0,
            contact_name: String::new(),
            content_type: String::new(),
            read_report: 0,
            read_status: 0,
            message_id: String::new(),
            message_size: 0,
            message_type: 0,
            sim_slot: 0,
            presentation: 0,
            subscription_id: String::new(),
        }
    }

    /// Epoch seconds as persisted in the `date` column
    #[must_use]
    pub fn unix_seconds(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Participants joined the way they are stored in the `addresses` column
    #[must_use]
    pub fn joined_participants(&self) -> Option<String> {
        if self.participant_addresses.is_empty() {
            None
        } else {
            Some(self.participant_addresses.join(","))
        }
    }

    /// The tuple that must be unique within one store
    #[must_use]
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            record_type: self.kind.code(),
            address: self.address.clone(),
            date: self.unix_seconds(),
            direction_type: self.direction_type,
            body: self.body.clone(),
            content_type: self.content_type.clone(),
            message_id: self.message_id.clone(),
            duration: self.duration,
        }
    }
}

/// Identity of a record for idempotent ingestion.
///
/// Mirrors the unique index on the `messages` table, where NULL text columns
/// compare as empty strings and a NULL duration as zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    /// Stored kind code
    pub record_type: i32,
    /// Normalized address key
    pub address: String,
    /// Epoch seconds
    pub date: i64,
    /// Direction code
    pub direction_type: i32,
    /// Body text
    pub body: String,
    /// MMS content type
    pub content_type: String,
    /// MMS message id
    pub message_id: String,
    /// Call duration
    pub duration: i64,
}

/// Lifecycle of the current upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Stream opened, no records written yet
    Parsing,
    /// Records are being written
    Importing,
    /// Stream fully consumed
    Completed,
    /// Run aborted; see `error_message`
    Error,
}

/// Snapshot of the single in-flight import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// Messages declared by the backup root, later the processed count
    pub total_messages: u64,
    /// SMS and MMS entries handled so far
    pub processed_messages: u64,
    /// Calls declared or seen so far
    pub total_calls: u64,
    /// Call entries handled so far
    pub processed_calls: u64,
    /// Current state
    pub status: UploadStatus,
    /// Failure reason when `status` is `Error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the run started
    pub start_time: DateTime<Utc>,
}

impl UploadProgress {
    /// Fresh progress for a run starting now
    #[must_use]
    pub fn started() -> Self {
        Self {
            total_messages: 0,
            processed_messages: 0,
            total_calls: 0,
            processed_calls: 0,
            status: UploadStatus::Parsing,
            error_message: None,
            start_time: Utc::now(),
        }
    }

    /// Share of declared messages handled, 0-100
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f64 {
        if self.total_messages == 0 {
            return 0.0;
        }
        (self.processed_messages as f64 / self.total_messages as f64 * 100.0).min(100.0)
    }

    /// Whether the run has reached a terminal state
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.status, UploadStatus::Completed | UploadStatus::Error)
    }
}

/// Outcome of one parse run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseSummary {
    /// SMS and MMS entries handed to the store
    pub messages: u64,
    /// Call entries handed to the store
    pub calls: u64,
    /// Entries dropped because they could not be converted or stored
    pub skipped: u64,
    /// `count` attribute of the root element, if present
    pub declared_total: Option<u64>,
    /// Bytes consumed from the input
    pub bytes_read: u64,
}
