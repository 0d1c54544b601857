//! Streaming parser for SMS Backup & Restore XML archives
//!
//! Backups routinely run to several gigabytes of base64 MMS payloads, so the
//! document is never materialized. One event buffer and one scratch buffer
//! are reused for the whole run; each entry is converted, written and dropped
//! before the next is read.
//!
//! Entry-level problems (bad timestamp, undecodable attributes) skip the
//! entry. Framing problems (XML syntax, truncation) abort the run.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, error, info, trace, warn};

use crate::convert::{
    convert_call, convert_mms, convert_sms, CallEntry, MmsAddr, MmsEntry, MmsPart, SmsEntry,
};
use crate::error::{ConversionError, Result, SbvError};
use crate::logging::OperationTimer;
use crate::metrics;
use crate::models::{ParseSummary, RecordKind, UnifiedRecord};
use crate::progress::ProgressTracker;
use crate::repository::RecordRepository;
use crate::sink::IngestionSink;

const DEFAULT_BUFFER_CAPACITY: usize = 64 * 1024;

/// Tuning knobs for a parse run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Shrink buffers after this many SMS entries
    pub sms_reclaim_interval: u64,
    /// Shrink buffers after this many MMS entries
    pub mms_reclaim_interval: u64,
    /// Emit a progress log line after this many entries
    pub progress_log_interval: u64,
    /// Initial (and post-reclaim) capacity of the reusable buffers
    pub buffer_capacity: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            sms_reclaim_interval: 1000,
            mms_reclaim_interval: 100,
            progress_log_interval: 10_000,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl ParserConfig {
    /// Set the SMS reclaim interval
    #[must_use]
    pub const fn with_sms_reclaim_interval(mut self, interval: u64) -> Self {
        self.sms_reclaim_interval = interval;
        self
    }

    /// Set the MMS reclaim interval
    #[must_use]
    pub const fn with_mms_reclaim_interval(mut self, interval: u64) -> Self {
        self.mms_reclaim_interval = interval;
        self
    }

    /// Set the progress log interval
    #[must_use]
    pub const fn with_progress_log_interval(mut self, interval: u64) -> Self {
        self.progress_log_interval = interval;
        self
    }
}

/// Streaming importer for backup documents
#[derive(Debug, Clone, Copy, Default)]
pub struct BackupParser {
    config: ParserConfig,
}

impl BackupParser {
    /// Create a parser with the given tuning
    #[must_use]
    pub const fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    /// Open `path` and import it. Failing to open does not touch `progress`.
    pub fn parse_file<R: RecordRepository + ?Sized>(
        &self,
        path: &Path,
        repo: &R,
        progress: &ProgressTracker,
    ) -> Result<ParseSummary> {
        let file = File::open(path)?;
        let reader = BufReader::with_capacity(self.config.buffer_capacity, file);
        self.parse(reader, repo, progress)
    }

    /// Import a backup stream, replacing the tracked progress with this run
    pub fn parse<B: BufRead, R: RecordRepository + ?Sized>(
        &self,
        input: B,
        repo: &R,
        progress: &ProgressTracker,
    ) -> Result<ParseSummary> {
        progress.begin();
        let timer = OperationTimer::new("parse_backup");

        let result = self.run(input, repo, progress);
        match &result {
            Ok(summary) => {
                progress.complete();
                info!(
                    messages = summary.messages,
                    calls = summary.calls,
                    skipped = summary.skipped,
                    declared = ?summary.declared_total,
                    bytes = summary.bytes_read,
                    "Backup import completed"
                );
            }
            Err(err) => {
                progress.fail(err.to_string());
                error!(error = %err, "Backup import failed");
            }
        }
        metrics::record_parse_duration(timer.finish());
        result
    }

    fn run<B: BufRead, R: RecordRepository + ?Sized>(
        &self,
        input: B,
        repo: &R,
        progress: &ProgressTracker,
    ) -> Result<ParseSummary> {
        let mut reader = Reader::from_reader(input);
        reader.config_mut().trim_text(true);

        let sink = IngestionSink::new(repo, progress);
        let mut run = RunState::new(self.config);
        let capacity = self.config.buffer_capacity;
        let mut buf = Vec::with_capacity(capacity);
        let mut scratch = Vec::with_capacity(capacity);

        loop {
            if run.reclaim_pending {
                buf.shrink_to(capacity);
                scratch.shrink_to(capacity);
                run.reclaim_pending = false;
                trace!(
                    messages = run.summary.messages,
                    "Released parser buffers"
                );
            }
            buf.clear();

            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    if run.depth == 0 {
                        run.enter_root(&e, progress);
                        run.depth += 1;
                        continue;
                    }
                    match e.local_name().as_ref() {
                        b"sms" => {
                            let entry = read_sms(&e);
                            let end = e.to_end().into_owned();
                            reader.read_to_end_into(end.name(), &mut scratch)?;
                            scratch.clear();
                            run.handle(RecordKind::Sms, entry.and_then(|s| convert_sms(&s)), &sink);
                        }
                        b"mms" => {
                            let mut entry = MmsEntry::default();
                            let head = decode_attributes(&e, |name, value| {
                                entry.set_attribute(name, value);
                            });
                            let children = read_mms_children(&mut reader, &mut scratch, &mut entry)?;
                            scratch.clear();
                            let record = head.and(children).and_then(|()| convert_mms(&entry));
                            run.handle(RecordKind::Mms, record, &sink);
                        }
                        b"call" => {
                            let entry = read_call(&e);
                            let end = e.to_end().into_owned();
                            reader.read_to_end_into(end.name(), &mut scratch)?;
                            scratch.clear();
                            run.handle(RecordKind::Call, entry.and_then(|c| convert_call(&c)), &sink);
                        }
                        _ => run.depth += 1,
                    }
                }
                Event::Empty(e) => {
                    if run.depth == 0 {
                        run.enter_root(&e, progress);
                        continue;
                    }
                    match e.local_name().as_ref() {
                        b"sms" => {
                            run.handle(RecordKind::Sms, read_sms(&e).and_then(|s| convert_sms(&s)), &sink);
                        }
                        b"mms" => {
                            let mut entry = MmsEntry::default();
                            let record = decode_attributes(&e, |name, value| {
                                entry.set_attribute(name, value);
                            })
                            .and_then(|()| convert_mms(&entry));
                            run.handle(RecordKind::Mms, record, &sink);
                        }
                        b"call" => {
                            run.handle(RecordKind::Call, read_call(&e).and_then(|c| convert_call(&c)), &sink);
                        }
                        _ => {}
                    }
                }
                Event::End(_) => run.depth = run.depth.saturating_sub(1),
                Event::Eof => break,
                _ => {}
            }

            if run.log_pending {
                run.log_pending = false;
                info!(
                    messages = run.summary.messages,
                    calls = run.summary.calls,
                    skipped = run.summary.skipped,
                    bytes = position(&reader),
                    "Import progress"
                );
            }
        }

        if !run.seen_root {
            return Err(SbvError::MalformedDocument(
                "document has no root element".to_string(),
            ));
        }
        if run.depth != 0 {
            return Err(SbvError::MalformedDocument(
                "unexpected end of document".to_string(),
            ));
        }

        run.summary.bytes_read = position(&reader);
        Ok(run.summary)
    }
}

/// Mutable bookkeeping for one run
struct RunState {
    config: ParserConfig,
    summary: ParseSummary,
    depth: usize,
    seen_root: bool,
    sms_seen: u64,
    mms_seen: u64,
    entries_seen: u64,
    reclaim_pending: bool,
    log_pending: bool,
}

impl RunState {
    const fn new(config: ParserConfig) -> Self {
        Self {
            config,
            summary: ParseSummary {
                messages: 0,
                calls: 0,
                skipped: 0,
                declared_total: None,
                bytes_read: 0,
            },
            depth: 0,
            seen_root: false,
            sms_seen: 0,
            mms_seen: 0,
            entries_seen: 0,
            reclaim_pending: false,
            log_pending: false,
        }
    }

    /// The outermost element; `<smses>` and `<calls>` declare a count.
    fn enter_root(&mut self, e: &BytesStart<'_>, progress: &ProgressTracker) {
        self.seen_root = true;
        let mut count = None;
        if let Err(err) = decode_attributes(e, |name, value| {
            if name == b"count" {
                count = value.trim().parse::<u64>().ok();
            }
        }) {
            warn!(error = %err, "Ignoring undecodable root attributes");
        }

        let Some(total) = count else { return };
        self.summary.declared_total = Some(total);
        match e.local_name().as_ref() {
            b"calls" => progress.set_declared_calls(total),
            _ => progress.set_declared_messages(total),
        }
        debug!(total, "Backup root declares entry count");
    }

    fn handle<R: RecordRepository + ?Sized>(
        &mut self,
        kind: RecordKind,
        record: std::result::Result<UnifiedRecord, ConversionError>,
        sink: &IngestionSink<'_, R>,
    ) {
        self.entries_seen += 1;
        let log_interval = self.config.progress_log_interval;
        if log_interval > 0 && self.entries_seen % log_interval == 0 {
            self.log_pending = true;
        }
        match kind {
            RecordKind::Sms => {
                self.sms_seen += 1;
                if self.config.sms_reclaim_interval > 0
                    && self.sms_seen % self.config.sms_reclaim_interval == 0
                {
                    self.reclaim_pending = true;
                }
            }
            RecordKind::Mms => {
                self.mms_seen += 1;
                if self.config.mms_reclaim_interval > 0
                    && self.mms_seen % self.config.mms_reclaim_interval == 0
                {
                    self.reclaim_pending = true;
                }
            }
            RecordKind::Call => {}
        }

        let record = match record {
            Ok(record) => record,
            Err(err) => {
                error!(kind = kind.as_str(), error = %err, "Error decoding entry");
                metrics::record_skipped(kind, "convert");
                self.summary.skipped += 1;
                return;
            }
        };

        let stored = if kind.is_message() {
            sink.insert_message(&record)
        } else {
            sink.insert_call(&record)
        };
        match (stored, kind.is_message()) {
            (false, _) => self.summary.skipped += 1,
            (true, true) => self.summary.messages += 1,
            (true, false) => self.summary.calls += 1,
        }
    }
}

fn position<B>(reader: &Reader<B>) -> u64 {
    u64::try_from(reader.buffer_position()).unwrap_or(u64::MAX)
}

fn read_sms(e: &BytesStart<'_>) -> std::result::Result<SmsEntry, ConversionError> {
    let mut entry = SmsEntry::default();
    decode_attributes(e, |name, value| entry.set_attribute(name, value))?;
    Ok(entry)
}

fn read_call(e: &BytesStart<'_>) -> std::result::Result<CallEntry, ConversionError> {
    let mut entry = CallEntry::default();
    decode_attributes(e, |name, value| entry.set_attribute(name, value))?;
    Ok(entry)
}

/// Consume everything up to the closing `</mms>`, collecting parts and addrs.
///
/// An undecodable child is reported (first one wins) but does not stop the
/// read, so the stream stays aligned on the next sibling.
fn read_mms_children<B: BufRead>(
    reader: &mut Reader<B>,
    buf: &mut Vec<u8>,
    entry: &mut MmsEntry,
) -> Result<std::result::Result<(), ConversionError>> {
    let mut depth = 0usize;
    let mut problem = Ok(());
    loop {
        buf.clear();
        match reader.read_event_into(buf)? {
            Event::Start(e) => {
                depth += 1;
                let outcome = read_mms_child(&e, entry);
                if problem.is_ok() {
                    problem = outcome;
                }
            }
            Event::Empty(e) => {
                let outcome = read_mms_child(&e, entry);
                if problem.is_ok() {
                    problem = outcome;
                }
            }
            Event::End(_) => {
                if depth == 0 {
                    return Ok(problem);
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(SbvError::MalformedDocument(
                    "unexpected end of document inside <mms>".to_string(),
                ))
            }
            _ => {}
        }
    }
}

fn read_mms_child(
    e: &BytesStart<'_>,
    entry: &mut MmsEntry,
) -> std::result::Result<(), ConversionError> {
    match e.local_name().as_ref() {
        b"part" => {
            let mut part = MmsPart::default();
            decode_attributes(e, |name, value| part.set_attribute(name, value))?;
            entry.parts.push(part);
        }
        b"addr" => {
            let mut addr = MmsAddr::default();
            decode_attributes(e, |name, value| addr.set_attribute(name, value))?;
            entry.addrs.push(addr);
        }
        _ => {}
    }
    Ok(())
}

/// Feed every attribute's local name and unescaped value to `apply`.
fn decode_attributes<F>(e: &BytesStart<'_>, mut apply: F) -> std::result::Result<(), ConversionError>
where
    F: FnMut(&[u8], String),
{
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ConversionError::Attributes(err.to_string()))?;
        apply(attr.key.local_name().as_ref(), attribute_value(&attr.value));
    }
    Ok(())
}

/// Strict XML unescaping with a lenient fallback.
///
/// The backup tool writes astral-plane characters as two numeric references
/// to UTF-16 surrogates (`&#55357;&#56832;`), which strict unescaping rejects.
fn attribute_value(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    match quick_xml::escape::unescape(&text) {
        Ok(value) => value.into_owned(),
        Err(_) => unescape_lenient(&text),
    }
}

enum Reference {
    Char(char),
    HighSurrogate(u32),
    LowSurrogate(u32),
}

/// Resolve references that can be resolved and keep the rest verbatim.
pub(crate) fn unescape_lenient(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];

        let Some((reference, len)) = parse_reference(rest) else {
            out.push('&');
            rest = &rest[1..];
            continue;
        };
        rest = &rest[len..];

        match reference {
            Reference::Char(c) => out.push(c),
            Reference::HighSurrogate(high) => match parse_reference(rest) {
                Some((Reference::LowSurrogate(low), next_len)) => {
                    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                    rest = &rest[next_len..];
                }
                _ => out.push(char::REPLACEMENT_CHARACTER),
            },
            Reference::LowSurrogate(_) => out.push(char::REPLACEMENT_CHARACTER),
        }
    }

    out.push_str(rest);
    out
}

/// Parse `&name;` at the start of `s`, returning the reference and its length.
fn parse_reference(s: &str) -> Option<(Reference, usize)> {
    if !s.starts_with('&') {
        return None;
    }
    let end = s.bytes().take(16).position(|b| b == b';')?;
    let reference = match &s[1..end] {
        "lt" => Reference::Char('<'),
        "gt" => Reference::Char('>'),
        "amp" => Reference::Char('&'),
        "apos" => Reference::Char('\''),
        "quot" => Reference::Char('"'),
        name => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse().ok()?,
            };
            match code {
                0xD800..=0xDBFF => Reference::HighSurrogate(code),
                0xDC00..=0xDFFF => Reference::LowSurrogate(code),
                _ => Reference::Char(char::from_u32(code)?),
            }
        }
    };
    Some((reference, end + 1))
}
