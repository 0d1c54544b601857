//! Conversion of raw backup entries into [`UnifiedRecord`]s
//!
//! Entries arrive as plain attribute bags filled by the streaming parser.
//! Conversion is pure: it normalizes addresses, decodes MMS part payloads and
//! fails only when an entry has no usable timestamp or a malformed core
//! numeric field.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::address::{normalize_phone_number, normalize_participants};
use crate::error::ConversionError;
use crate::models::{direction, MediaAttachment, RecordKind, UnifiedRecord};

/// `<addr type="137">` marks the originator of an MMS.
pub const MMS_ADDR_TYPE_FROM: i32 = 137;

/// Attributes of an `<sms>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SmsEntry {
    /// `address`
    pub address: String,
    /// `date`, epoch milliseconds
    pub date: String,
    /// `type`, direction code
    pub kind: String,
    /// `body`
    pub body: String,
    /// `read`
    pub read: String,
    /// `thread_id`
    pub thread_id: String,
    /// `subject`
    pub subject: String,
    /// `protocol`
    pub protocol: String,
    /// `service_center`
    pub service_center: String,
    /// `status`
    pub status: String,
    /// `sub_id`
    pub sub_id: String,
    /// `contact_name`
    pub contact_name: String,
}

impl SmsEntry {
    /// Store one attribute; unknown names are ignored
    pub fn set_attribute(&mut self, name: &[u8], value: String) {
        match name {
            b"address" => self.address = value,
            b"date" => self.date = value,
            b"type" => self.kind = value,
            b"body" => self.body = value,
            b"read" => self.read = value,
            b"thread_id" => self.thread_id = value,
            b"subject" => self.subject = value,
            b"protocol" => self.protocol = value,
            b"service_center" => self.service_center = value,
            b"status" => self.status = value,
            b"sub_id" => self.sub_id = value,
            b"contact_name" => self.contact_name = value,
            _ => {}
        }
    }
}

/// One `<part>` of an MMS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MmsPart {
    /// `ct`
    pub content_type: String,
    /// `text`
    pub text: String,
    /// `data`, base64
    pub data: String,
}

impl MmsPart {
    /// Store one attribute; unknown names are ignored
    pub fn set_attribute(&mut self, name: &[u8], value: String) {
        match name {
            b"ct" => self.content_type = value,
            b"text" => self.text = value,
            b"data" => self.data = value,
            _ => {}
        }
    }
}

/// One `<addr>` of an MMS
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MmsAddr {
    /// `address`
    pub address: String,
    /// `type`, 137 for the sender
    pub kind: String,
}

impl MmsAddr {
    /// Store one attribute; unknown names are ignored
    pub fn set_attribute(&mut self, name: &[u8], value: String) {
        match name {
            b"address" => self.address = value,
            b"type" => self.kind = value,
            _ => {}
        }
    }
}

/// Attributes and children of an `<mms>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MmsEntry {
    /// `address`
    pub address: String,
    /// `date`, epoch milliseconds
    pub date: String,
    /// `msg_box`, direction code
    pub msg_box: String,
    /// `read`
    pub read: String,
    /// `thread_id`
    pub thread_id: String,
    /// `sub`
    pub subject: String,
    /// `ct_t`
    pub content_type: String,
    /// `rr`
    pub read_report: String,
    /// `read_status`
    pub read_status: String,
    /// `m_id`
    pub message_id: String,
    /// `m_size`
    pub message_size: String,
    /// `m_type`
    pub message_type: String,
    /// `sim_slot`
    pub sim_slot: String,
    /// `contact_name`
    pub contact_name: String,
    /// `<parts>` children in document order
    pub parts: Vec<MmsPart>,
    /// `<addrs>` children in document order
    pub addrs: Vec<MmsAddr>,
}

impl MmsEntry {
    /// Store one attribute; unknown names are ignored
    pub fn set_attribute(&mut self, name: &[u8], value: String) {
        match name {
            b"address" => self.address = value,
            b"date" => self.date = value,
            b"msg_box" => self.msg_box = value,
            b"read" => self.read = value,
            b"thread_id" => self.thread_id = value,
            b"sub" => self.subject = value,
            b"ct_t" => self.content_type = value,
            b"rr" => self.read_report = value,
            b"read_status" => self.read_status = value,
            b"m_id" => self.message_id = value,
            b"m_size" => self.message_size = value,
            b"m_type" => self.message_type = value,
            b"sim_slot" => self.sim_slot = value,
            b"contact_name" => self.contact_name = value,
            _ => {}
        }
    }
}

/// Attributes of a `<call>` element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallEntry {
    /// `number`
    pub number: String,
    /// `duration`, seconds
    pub duration: String,
    /// `date`, epoch milliseconds
    pub date: String,
    /// `type`, direction code
    pub kind: String,
    /// `presentation`
    pub presentation: String,
    /// `subscription_id`
    pub subscription_id: String,
    /// `contact_name`
    pub contact_name: String,
}

impl CallEntry {
    /// Store one attribute; unknown names are ignored
    pub fn set_attribute(&mut self, name: &[u8], value: String) {
        match name {
            b"number" => self.number = value,
            b"duration" => self.duration = value,
            b"date" => self.date = value,
            b"type" => self.kind = value,
            b"presentation" => self.presentation = value,
            b"subscription_id" => self.subscription_id = value,
            b"contact_name" => self.contact_name = value,
            _ => {}
        }
    }
}

/// Convert an `<sms>` entry
pub fn convert_sms(entry: &SmsEntry) -> Result<UnifiedRecord, ConversionError> {
    let timestamp = parse_timestamp(&entry.date)?;
    let direction_type = parse_core_int("type", &entry.kind)?;
    let address = normalize_phone_number(&entry.address);

    let mut record = UnifiedRecord::new(RecordKind::Sms, timestamp);
    record.sender = (direction_type == direction::MESSAGE_RECEIVED && !address.is_empty())
        .then(|| address.clone());
    record.address = address;
    record.body.clone_from(&entry.body);
    record.direction_type = direction_type;
    record.read = entry.read == "1";
    record.thread_id = parse_lenient(&entry.thread_id);
    record.subject = normalize_null_string(&entry.subject).to_string();
    record.protocol = parse_lenient(&entry.protocol);
    record.status = parse_lenient(&entry.status);
    record.service_center.clone_from(&entry.service_center);
    record.sub_id = parse_lenient(&entry.sub_id);
    record.contact_name.clone_from(&entry.contact_name);
    Ok(record)
}

/// Convert an `<mms>` entry, including its parts and participants
pub fn convert_mms(entry: &MmsEntry) -> Result<UnifiedRecord, ConversionError> {
    let timestamp = parse_timestamp(&entry.date)?;
    let direction_type = parse_core_int("msg_box", &entry.msg_box)?;

    let participants =
        normalize_participants(entry.addrs.iter().map(|addr| addr.address.as_str()));
    let sender = (direction_type == direction::MESSAGE_RECEIVED)
        .then(|| infer_mms_sender(&entry.addrs))
        .flatten();

    let normalized_address = normalize_phone_number(&entry.address);
    let address = if participants.len() >= 3 {
        participants.join(",")
    } else if normalized_address.is_empty() {
        participants.first().cloned().unwrap_or_default()
    } else {
        normalized_address
    };

    let mut record = UnifiedRecord::new(RecordKind::Mms, timestamp);
    record.address = address;
    record.participant_addresses = participants;
    record.sender = sender;
    record.direction_type = direction_type;
    record.read = entry.read == "1";
    record.thread_id = parse_lenient(&entry.thread_id);
    record.subject = normalize_null_string(&entry.subject).to_string();
    record.content_type.clone_from(&entry.content_type);
    record.read_report = parse_lenient(&entry.read_report);
    record.read_status = parse_lenient(&entry.read_status);
    record.message_id.clone_from(&entry.message_id);
    record.message_size = parse_lenient(&entry.message_size);
    record.message_type = parse_lenient(&entry.message_type);
    record.sim_slot = parse_lenient(&entry.sim_slot);
    record.contact_name.clone_from(&entry.contact_name);

    let (body, media) = extract_parts(&entry.parts);
    record.body = body;
    record.media = media;
    Ok(record)
}

/// Convert a `<call>` entry
pub fn convert_call(entry: &CallEntry) -> Result<UnifiedRecord, ConversionError> {
    let timestamp = parse_timestamp(&entry.date)?;

    let mut record = UnifiedRecord::new(RecordKind::Call, timestamp);
    record.address = normalize_phone_number(&entry.number);
    record.direction_type = parse_core_int("type", &entry.kind)?;
    record.duration = parse_core_int("duration", &entry.duration)?.into();
    record.presentation = parse_lenient(&entry.presentation);
    record.subscription_id.clone_from(&entry.subscription_id);
    record.contact_name.clone_from(&entry.contact_name);
    Ok(record)
}

/// The explicit FROM address, else the first participant encountered.
///
/// With several participants and no FROM marker the first one is a guess.
fn infer_mms_sender(addrs: &[MmsAddr]) -> Option<String> {
    let mut first = None;
    for addr in addrs {
        let normalized = normalize_phone_number(&addr.address);
        if normalized.is_empty() {
            continue;
        }
        if addr.kind.trim().parse::<i32>().ok() == Some(MMS_ADDR_TYPE_FROM) {
            return Some(normalized);
        }
        if first.is_none() {
            first = Some(normalized);
        }
    }
    first
}

/// Split MMS parts into body text and the first attachment.
fn extract_parts(parts: &[MmsPart]) -> (String, Option<MediaAttachment>) {
    let mut texts: Vec<&str> = Vec::new();
    let mut media: Option<MediaAttachment> = None;

    for part in parts {
        if is_smil_content_type(&part.content_type) {
            continue;
        }

        if is_vcard_content_type(&part.content_type) && !part.data.is_empty() {
            if media.is_none() {
                media = decode_attachment(part);
            }
            continue;
        }

        if !part.content_type.is_empty()
            && !part.data.is_empty()
            && !is_text_content_type(&part.content_type)
        {
            if media.is_none() {
                media = decode_attachment(part);
            }
        } else if !normalize_null_string(&part.text).is_empty() && !is_smil_markup(&part.text) {
            texts.push(&part.text);
        }
    }

    (texts.join(" ").trim().to_string(), media)
}

fn decode_attachment(part: &MmsPart) -> Option<MediaAttachment> {
    let cleaned: Vec<u8> = part
        .data
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    match STANDARD.decode(cleaned) {
        Ok(data) => Some(MediaAttachment {
            mime_type: part.content_type.clone(),
            data,
        }),
        Err(err) => {
            debug!(content_type = %part.content_type, error = %err, "Ignoring undecodable MMS part");
            None
        }
    }
}

/// Epoch milliseconds to a whole-second UTC instant
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ConversionError> {
    let invalid = || ConversionError::InvalidTimestamp {
        value: raw.to_string(),
    };
    let millis: i64 = raw.trim().parse().map_err(|_| invalid())?;
    DateTime::from_timestamp(millis / 1000, 0).ok_or_else(invalid)
}

/// Missing means zero; present but not an integer rejects the entry.
fn parse_core_int(field: &'static str, raw: &str) -> Result<i32, ConversionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
        return Ok(0);
    }
    trimmed.parse().map_err(|_| ConversionError::InvalidNumber {
        field,
        value: raw.to_string(),
    })
}

fn parse_lenient(raw: &str) -> i64 {
    raw.trim().parse().unwrap_or(0)
}

/// The backup tool writes a literal `null` for absent strings.
#[must_use]
pub fn normalize_null_string(value: &str) -> &str {
    if value.trim().eq_ignore_ascii_case("null") {
        ""
    } else {
        value
    }
}

/// `text/*`, `application/xml` and `application/json`
#[must_use]
pub fn is_text_content_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    ct.starts_with("text/") || ct == "application/xml" || ct == "application/json"
}

/// SMIL presentation layout parts
#[must_use]
pub fn is_smil_content_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    ct == "application/smil" || ct.starts_with("application/smil+") || ct.contains("smil")
}

/// Contact cards, stored as attachments even though they are text
#[must_use]
pub fn is_vcard_content_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    matches!(ct.as_str(), "text/vcard" | "text/x-vcard" | "text/directory")
}

fn is_smil_markup(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("<smil") || trimmed.starts_with("<?xml")
}
