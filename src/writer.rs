//! The driving loop: codec units in, CDX rows out.
//!
//! One record is fully consumed (parsed, dispatched, digested, rendered)
//! before the next unit is requested. The input handle is owned here for
//! the whole run and reused via seek during resynchronization; the output
//! handle is append-only. Errors are classified per `error.rs` and either
//! recovered, charged to the record, or allowed to abort the run with
//! whatever output was already written left intact.

use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use std::sync::LazyLock;

use regex::Regex;

use crate::canon::UrlKey;
use crate::dispatch::{dispatch, DispatchMode};
use crate::error::{CdxError, ErrorClass};
use crate::exclusion::Exclusion;
use crate::fields::{render_row, FieldCode, FieldContext};
use crate::handler::{self, HandlerData};
use crate::http;
use crate::parser::RecordParser;
use crate::record::{Family, LogicalRecord, RecordType};
use crate::stream::{open_stream, RecordStream};

static RE_RESPONSE_MSGTYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^application/http;\s*msgtype=response$").unwrap());

pub const DEFAULT_FORMAT: &str = "N b a m s k r M S V g";

/// Large HTML bodies are digested but not scanned for meta tags.
pub const DEFAULT_HTML_META_CAP: u64 = 5 * 1024 * 1024;

// ── Options, stats, policy ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CdxOptions {
    pub format:        String,
    pub mode:          DispatchMode,
    /// Value of the `g` (file name) field.
    pub warc_path:     String,
    pub tolerance:     Tolerance,
    pub html_meta_cap: u64,
}

impl Default for CdxOptions {
    fn default() -> Self {
        CdxOptions {
            format:        DEFAULT_FORMAT.to_owned(),
            mode:          DispatchMode::Default,
            warc_path:     String::new(),
            tolerance:     Tolerance::Common,
            html_meta_cap: DEFAULT_HTML_META_CAP,
        }
    }
}

/// Run-wide error tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// First error aborts.
    None,
    /// Tolerate the curated set of known-benign classes.
    Common,
    /// Best-effort: tolerate everything except genuine I/O failures.
    All,
}

impl Tolerance {
    fn tolerates(self, err: &CdxError) -> bool {
        match self {
            Tolerance::None => false,
            Tolerance::Common => err.is_benign(),
            Tolerance::All => !matches!(err.class(), ErrorClass::Fatal),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub num_records_processed: u64,
    pub num_records_included:  u64,
    pub num_records_filtered:  u64,
    pub num_records_failed:    u64,
}

/// First occurrence of an error class is reported in full; repeats are
/// demoted so a file with thousands of identical malformations does not
/// flood the log.
struct ErrorReporter {
    seen: HashSet<&'static str>,
}

impl ErrorReporter {
    fn new() -> Self {
        ErrorReporter { seen: HashSet::new() }
    }

    fn report(&mut self, err: &CdxError, offset: u64) {
        if self.seen.insert(err.key()) {
            log::warn!("ignoring record at offset {offset}: {err}");
        } else {
            log::debug!("ignoring record at offset {offset}: {err}");
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct CdxWriter {
    opts:      CdxOptions,
    fields:    Vec<FieldCode>,
    canon:     Box<dyn UrlKey>,
    exclusion: Option<Box<dyn Exclusion>>,
    stats:     Stats,
    reporter:  ErrorReporter,
}

enum UnitOutcome {
    /// A record was consumed (indexed, filtered, or skipped).
    Record,
    /// The unit produced no record; the value is the resulting offset.
    Empty(u64),
}

enum Draft {
    Empty,
    Skip,
    Row(HandlerData),
}

impl CdxWriter {
    pub fn new(
        opts: CdxOptions,
        canon: Box<dyn UrlKey>,
        exclusion: Option<Box<dyn Exclusion>>,
    ) -> Result<Self, CdxError> {
        let fields = FieldCode::parse_format(&opts.format)?;
        Ok(CdxWriter {
            opts,
            fields,
            canon,
            exclusion,
            stats: Stats::default(),
            reporter: ErrorReporter::new(),
        })
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Index one archive file into `out`.
    pub fn make_cdx(&mut self, input: &Path, out: &mut dyn Write) -> Result<(), CdxError> {
        writeln!(out, " CDX {}", self.opts.format.split_whitespace().collect::<Vec<_>>().join(" "))?;

        let input_name = input.display().to_string();
        let mut stream = open_stream(input)?;
        let mut parser = RecordParser::new();

        // Loop-termination guard: two consecutive no-record units ending at
        // the same offset mean genuine end of file, not another empty
        // member.
        let mut last_empty_at: Option<u64> = None;

        loop {
            let unit_offset = match stream.next_unit() {
                Ok(Some(o)) => o,
                Ok(None) => break,
                Err(e) => {
                    let pos = stream.position();
                    let err = CdxError::from(e).into_decode_at(pos);
                    if !self.recover(stream.as_mut(), err, pos)? {
                        break;
                    }
                    continue;
                }
            };

            match self.process_unit(stream.as_mut(), &mut parser, unit_offset, &input_name, out) {
                Ok(UnitOutcome::Record) => last_empty_at = None,
                Ok(UnitOutcome::Empty(end)) => {
                    if last_empty_at == Some(end) {
                        break;
                    }
                    last_empty_at = Some(end);
                }
                Err(e) => {
                    let err = e.into_decode_at(unit_offset);
                    self.stats.num_records_failed += 1;
                    if !self.recover(stream.as_mut(), err, unit_offset)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply the tolerance policy to `err`. Returns `Ok(true)` when the
    /// loop should continue, `Ok(false)` at scan-exhausted end of file, and
    /// `Err` when the run must abort.
    fn recover(
        &mut self,
        stream: &mut dyn RecordStream,
        err: CdxError,
        unit_offset: u64,
    ) -> Result<bool, CdxError> {
        if !self.opts.tolerance.tolerates(&err) {
            log::error!("aborting at offset {unit_offset}: {err}");
            return Err(err);
        }
        self.reporter.report(&err, unit_offset);

        match err.class() {
            ErrorClass::Resync => {
                // The decoder may have read far past the next healthy
                // record; go back to the failing unit and search forward.
                Ok(stream.resync_from(unit_offset + 1)?)
            }
            ErrorClass::SkipRecord => {
                // Advance to the next unit without seeking backward.
                match stream.finish_unit() {
                    Ok(_) => Ok(true),
                    Err(_) => Ok(stream.resync_from(unit_offset + 1)?),
                }
            }
            ErrorClass::Fatal => Err(err),
        }
    }

    fn process_unit(
        &mut self,
        stream: &mut dyn RecordStream,
        parser: &mut RecordParser,
        offset: u64,
        input_name: &str,
        out: &mut dyn Write,
    ) -> Result<UnitOutcome, CdxError> {
        let draft = self.consume_record(stream, parser, offset)?;
        let end = stream
            .finish_unit()
            .map_err(|e| CdxError::from(e).into_decode_at(offset))?;

        match draft {
            Draft::Empty => Ok(UnitOutcome::Empty(end)),
            Draft::Skip => Ok(UnitOutcome::Record),
            Draft::Row(data) => {
                self.emit_row(&data, offset, end, input_name, out)?;
                Ok(UnitOutcome::Record)
            }
        }
    }

    /// Parse, dispatch, and drain one record. Stream borrows end here so
    /// the caller can measure the unit's physical extent.
    fn consume_record(
        &mut self,
        stream: &mut dyn RecordStream,
        parser: &mut RecordParser,
        offset: u64,
    ) -> Result<Draft, CdxError> {
        let Some(mut record) = parser.parse_record(stream, offset)? else {
            return Ok(Draft::Empty);
        };
        self.stats.num_records_processed += 1;

        // Live-proxy ARC files carry negative declared lengths with no
        // payload; drop those records outright.
        if record.content_length.is_some_and(|l| l < 0) {
            record.body.drain()?;
            return Ok(Draft::Skip);
        }

        let http_msg = if is_http_block(&mut record)? {
            Some(http::parse(record.take_body())?)
        } else {
            None
        };
        let status = http_msg.as_ref().map(|m| m.status);

        let Some(kind) = dispatch(self.opts.mode, &record, status) else {
            // Not indexed: still consume the block so plain-stream offsets
            // stay aligned.
            match http_msg {
                Some(mut msg) => {
                    msg.drain_rest()?;
                }
                None => {
                    record.body.drain()?;
                }
            }
            return Ok(Draft::Skip);
        };

        let data = handler::build(kind, &mut record, http_msg, self.opts.html_meta_cap)?;
        Ok(Draft::Row(data))
    }

    fn emit_row(
        &mut self,
        data: &HandlerData,
        start: u64,
        end: u64,
        input_name: &str,
        out: &mut dyn Write,
    ) -> Result<(), CdxError> {
        let ctx = FieldContext {
            data,
            file_name: &self.opts.warc_path,
            input_file: input_name,
            canon: self.canon.as_ref(),
        };

        if let (Some(excl), Some(key)) = (self.exclusion.as_deref(), ctx.massaged_url()) {
            if excl.excluded(&key) {
                self.stats.num_records_filtered += 1;
                return Ok(());
            }
        }

        let mut values = Vec::with_capacity(self.fields.len());
        for code in &self.fields {
            values.push(ctx.value(*code, start, end)?);
        }
        writeln!(out, "{}", render_row(&values))?;
        self.stats.num_records_included += 1;
        Ok(())
    }
}

/// Decide whether a record's block is an embedded HTTP message.
///
/// WARC responses declare it in the record content type; ARC payloads are
/// sniffed for a leading status line. Revisits never re-parse the message
/// (their digest is declared, not recomputed).
fn is_http_block(record: &mut LogicalRecord<'_>) -> Result<bool, CdxError> {
    if record.record_type != RecordType::Response {
        return Ok(false);
    }
    match record.family {
        Family::Warc => Ok(record
            .content_type
            .as_deref()
            .is_some_and(|ct| RE_RESPONSE_MSGTYPE.is_match(ct.trim()))),
        Family::Arc => {
            let head = record.body.peek(4)?;
            Ok(head.starts_with(b"HTTP"))
        }
    }
}
