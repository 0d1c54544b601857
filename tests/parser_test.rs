//! Comprehensive unit tests for parser.rs module

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sbv_rust::error::SbvError;
use sbv_rust::models::{RecordKind, UploadStatus};
use sbv_rust::parser::{BackupParser, ParserConfig};
use sbv_rust::progress::ProgressTracker;
use sbv_rust::repository::MemoryRepository;

fn parse(xml: &str) -> (sbv_rust::Result<sbv_rust::ParseSummary>, MemoryRepository, ProgressTracker) {
    let repo = MemoryRepository::new();
    let progress = ProgressTracker::new();
    let result = BackupParser::default().parse(Cursor::new(xml.as_bytes().to_vec()), &repo, &progress);
    (result, repo, progress)
}

fn sample_backup() -> String {
    let image = STANDARD.encode([0xFF, 0xD8, 0xFF, 0xE0]);
    format!(
        r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<!--File Created By SMS Backup & Restore-->
<smses count="3" backup_set="abc" backup_date="1700000000000">
  <sms protocol="0" address="555-123-4567" date="1700000000000" type="1" subject="null" body="Hey &amp; hello" read="1" status="-1" contact_name="Jane" />
  <sms protocol="0" address="+15551234567" date="1700000060000" type="2" subject="null" body="Reply" read="1" status="-1" contact_name="Jane" />
  <mms date="1700000120000" msg_box="1" address="5551110000~5552220000~5553330000" m_id="mid-1" ct_t="application/vnd.wap.multipart.related" read="1" sub="null" contact_name="Group">
    <parts>
      <part seq="-1" ct="application/smil" text="&lt;smil&gt;&lt;/smil&gt;" />
      <part seq="0" ct="image/jpeg" data="{image}" />
      <part seq="0" ct="text/plain" text="Look at this" />
    </parts>
    <addrs>
      <addr address="5552220000" type="137" charset="106" />
      <addr address="5551110000" type="151" charset="106" />
      <addr address="5553330000" type="151" charset="106" />
    </addrs>
  </mms>
</smses>
"#
    )
}

#[test]
fn test_parse_sample_backup() {
    let (result, repo, progress) = parse(&sample_backup());
    let summary = result.expect("parse");

    assert_eq!(summary.messages, 3);
    assert_eq!(summary.calls, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.declared_total, Some(3));
    assert!(summary.bytes_read > 0);

    assert_eq!(repo.count(RecordKind::Sms), 2);
    assert_eq!(repo.count(RecordKind::Mms), 1);

    let records = repo.records();
    assert_eq!(records[0].body, "Hey & hello");
    assert_eq!(records[0].address, "+15551234567");
    assert_eq!(records[1].address, "+15551234567");

    let mms = &records[2];
    assert_eq!(mms.address, "+15551110000,+15552220000,+15553330000");
    assert_eq!(mms.sender.as_deref(), Some("+15552220000"));
    assert_eq!(mms.body, "Look at this");
    assert_eq!(mms.message_id, "mid-1");
    assert_eq!(mms.media.as_ref().map(|m| m.mime_type.as_str()), Some("image/jpeg"));

    let snapshot = progress.snapshot().expect("progress");
    assert_eq!(snapshot.status, UploadStatus::Completed);
    assert_eq!(snapshot.processed_messages, 3);
    assert_eq!(snapshot.total_messages, 3);
}

#[test]
fn test_bad_entry_is_skipped_and_neighbours_survive() {
    let xml = r#"<smses count="3">
  <sms address="5551234567" date="1700000000000" type="1" body="one" />
  <sms address="5551234567" date="not-a-date" type="1" body="two" />
  <sms address="5551234567" date="1700000002000" type="1" body="three" />
</smses>"#;

    let (result, repo, _) = parse(xml);
    let summary = result.expect("parse");

    assert_eq!(summary.messages, 2);
    assert_eq!(summary.skipped, 1);
    let bodies: Vec<String> = repo.records().into_iter().map(|r| r.body).collect();
    assert_eq!(bodies, vec!["one".to_string(), "three".to_string()]);
}

#[test]
fn test_empty_backup_completes_with_no_records() {
    let (result, repo, progress) = parse(r#"<?xml version="1.0"?><smses count="0"></smses>"#);
    let summary = result.expect("parse");

    assert_eq!(summary.messages, 0);
    assert_eq!(summary.declared_total, Some(0));
    assert!(repo.is_empty());
    let snapshot = progress.snapshot().expect("progress");
    assert_eq!(snapshot.status, UploadStatus::Completed);
    assert_eq!(snapshot.processed_messages, 0);
}

#[test]
fn test_self_closing_root() {
    let (result, repo, _) = parse(r#"<smses count="0"/>"#);
    assert!(result.is_ok());
    assert!(repo.is_empty());
}

#[test]
fn test_document_without_root_is_rejected() {
    let (result, _, progress) = parse("");
    assert!(matches!(result, Err(SbvError::MalformedDocument(_))));
    assert_eq!(progress.snapshot().expect("progress").status, UploadStatus::Error);
}

#[test]
fn test_truncated_document_fails_and_keeps_earlier_records() {
    let xml = r#"<smses count="5">
  <sms address="5551234567" date="1700000000000" type="1" body="kept" />
  <sms address="5551234567" date="1700000001000" type="1" body="cut"#;

    let (result, repo, progress) = parse(xml);
    assert!(result.is_err());
    assert_eq!(repo.len(), 1);

    let snapshot = progress.snapshot().expect("progress");
    assert_eq!(snapshot.status, UploadStatus::Error);
    assert!(snapshot.error_message.is_some());
}

#[test]
fn test_unclosed_root_is_an_error() {
    let xml = r#"<smses count="1"><sms address="5551234567" date="1700000000000" type="1" body="x" />"#;
    let (result, repo, _) = parse(xml);
    assert!(result.is_err());
    assert_eq!(repo.len(), 1);
}

#[test]
fn test_call_log_backup() {
    let xml = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<calls count="2">
  <call number="555-123-4567" duration="65" date="1700000000000" type="1" presentation="1" contact_name="Jane" />
  <call number="5559876543" duration="0" date="1700000100000" type="3" presentation="1" contact_name="(Unknown)" />
</calls>"#;

    let (result, repo, progress) = parse(xml);
    let summary = result.expect("parse");

    assert_eq!(summary.calls, 2);
    assert_eq!(summary.messages, 0);
    assert_eq!(repo.count(RecordKind::Call), 2);
    assert_eq!(repo.records()[0].duration, 65);

    let snapshot = progress.snapshot().expect("progress");
    assert_eq!(snapshot.total_calls, 2);
    assert_eq!(snapshot.processed_calls, 2);
}

#[test]
fn test_surrogate_pair_references_decode_to_emoji() {
    let xml = r#"<smses count="1">
  <sms address="5551234567" date="1700000000000" type="1" body="Nice &#55357;&#56832; &amp; more" />
</smses>"#;

    let (result, repo, _) = parse(xml);
    result.expect("parse");
    assert_eq!(repo.records()[0].body, "Nice \u{1F600} & more");
}

#[test]
fn test_mms_with_empty_form_children() {
    let xml = r#"<smses count="1">
  <mms date="1700000000000" msg_box="2" address="5551110000" m_id="x">
    <parts><part ct="text/plain" text="sent text"/></parts>
    <addrs><addr address="5551110000" type="151"/></addrs>
  </mms>
</smses>"#;

    let (result, repo, _) = parse(xml);
    result.expect("parse");
    let record = &repo.records()[0];
    assert_eq!(record.body, "sent text");
    assert_eq!(record.address, "+15551110000");
    assert!(record.sender.is_none());
}

#[test]
fn test_mms_with_explicit_end_tags() {
    let xml = r#"<smses count="1">
  <mms date="1700000000000" msg_box="1" address="5551110000">
    <parts>
      <part ct="text/plain" text="hello"></part>
    </parts>
    <addrs>
      <addr address="5551110000" type="137"></addr>
    </addrs>
  </mms>
  <sms address="5551110000" date="1700000001000" type="2" body="after"></sms>
</smses>"#;

    let (result, repo, _) = parse(xml);
    let summary = result.expect("parse");
    assert_eq!(summary.messages, 2);
    let records = repo.records();
    assert_eq!(records[0].body, "hello");
    assert_eq!(records[0].sender.as_deref(), Some("+15551110000"));
    assert_eq!(records[1].body, "after");
}

#[test]
fn test_unknown_elements_are_ignored() {
    let xml = r#"<smses count="1">
  <metadata><device name="phone"/></metadata>
  <sms address="5551234567" date="1700000000000" type="1" body="x" />
</smses>"#;

    let (result, repo, _) = parse(xml);
    result.expect("parse");
    assert_eq!(repo.len(), 1);
}

#[test]
fn test_small_reclaim_intervals_do_not_change_results() {
    let mut xml = String::from(r#"<smses count="25">"#);
    for i in 0..25 {
        xml.push_str(&format!(
            r#"<sms address="5551234567" date="{}" type="1" body="msg {i}" />"#,
            1_700_000_000_000_i64 + i64::from(i) * 1000
        ));
    }
    xml.push_str("</smses>");

    let repo = MemoryRepository::new();
    let progress = ProgressTracker::new();
    let parser = BackupParser::new(
        ParserConfig::default()
            .with_sms_reclaim_interval(3)
            .with_mms_reclaim_interval(1)
            .with_progress_log_interval(5),
    );
    let summary = parser
        .parse(Cursor::new(xml.into_bytes()), &repo, &progress)
        .expect("parse");

    assert_eq!(summary.messages, 25);
    assert_eq!(repo.len(), 25);
}

#[test]
fn test_new_run_replaces_previous_progress() {
    let repo = MemoryRepository::new();
    let progress = ProgressTracker::new();
    let parser = BackupParser::default();

    let bad = parser.parse(Cursor::new(b"<smses><sms".to_vec()), &repo, &progress);
    assert!(bad.is_err());
    assert_eq!(progress.snapshot().expect("progress").status, UploadStatus::Error);

    parser
        .parse(Cursor::new(br#"<smses count="0"/>"#.to_vec()), &repo, &progress)
        .expect("parse");
    let snapshot = progress.snapshot().expect("progress");
    assert_eq!(snapshot.status, UploadStatus::Completed);
    assert!(snapshot.error_message.is_none());
}

#[test]
fn test_parse_file_missing_does_not_touch_progress() {
    let repo = MemoryRepository::new();
    let progress = ProgressTracker::new();
    let result = BackupParser::default().parse_file(
        std::path::Path::new("/no/such/backup.xml"),
        &repo,
        &progress,
    );
    assert!(matches!(result, Err(SbvError::Io(_))));
    assert!(progress.snapshot().is_none());
}
