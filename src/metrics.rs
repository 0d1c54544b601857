//! Metrics emitted by the import pipeline
//!
//! Only the `metrics` facade is used here. Nothing is recorded until the
//! embedding application installs a recorder.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::models::RecordKind;

/// Records written (or recognised as duplicates)
pub const RECORDS_STORED_TOTAL: &str = "sbv_records_stored_total";
/// Entries dropped during a run
pub const ENTRIES_SKIPPED_TOTAL: &str = "sbv_entries_skipped_total";
/// Media resolutions by kind and outcome
pub const MEDIA_CONVERSIONS_TOTAL: &str = "sbv_media_conversions_total";
/// Auto-import attempts by outcome
pub const IMPORT_FILES_TOTAL: &str = "sbv_import_files_total";
/// Wall time of a full parse run
pub const PARSE_DURATION_SECONDS: &str = "sbv_parse_duration_seconds";

/// A record reached the store
pub fn record_stored(kind: RecordKind) {
    counter!(RECORDS_STORED_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// An entry was dropped; `reason` is `convert` or `store`
pub fn record_skipped(kind: RecordKind, reason: &'static str) {
    counter!(ENTRIES_SKIPPED_TOTAL, "kind" => kind.as_str(), "reason" => reason).increment(1);
}

/// A media payload was resolved
pub fn record_media_conversion(media: &'static str, outcome: &'static str) {
    counter!(MEDIA_CONVERSIONS_TOTAL, "media" => media, "outcome" => outcome).increment(1);
}

/// A dropped file finished processing
pub fn record_import_file(outcome: &'static str) {
    counter!(IMPORT_FILES_TOTAL, "outcome" => outcome).increment(1);
}

/// A parse run ended
pub fn record_parse_duration(duration: Duration) {
    histogram!(PARSE_DURATION_SECONDS).record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_share_prefix() {
        for name in [
            RECORDS_STORED_TOTAL,
            ENTRIES_SKIPPED_TOTAL,
            MEDIA_CONVERSIONS_TOTAL,
            IMPORT_FILES_TOTAL,
            PARSE_DURATION_SECONDS,
        ] {
            assert!(name.starts_with("sbv_"), "{name}");
        }
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_stored(RecordKind::Sms);
        record_skipped(RecordKind::Call, "convert");
        record_media_conversion("video", "fallback");
        record_import_file("imported");
        record_parse_duration(Duration::from_millis(5));
    }
}
