//! Logical records: the unit of work between the codec layer and the
//! dispatcher. A record is produced from exactly one codec unit, consumed
//! exactly once, and never buffered beyond the current record.

use std::io::{self, Cursor, Read};

use crate::headers::HeaderMap;
use crate::stream::RecordStream;

// ── Record types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordType {
    Warcinfo,
    Response,
    Revisit,
    Resource,
    Request,
    Metadata,
    /// ARC file-description record carrying the header layout declaration.
    Filedesc,
    Other(String),
}

impl RecordType {
    pub fn from_warc(s: &str) -> RecordType {
        match s.to_ascii_lowercase().as_str() {
            "warcinfo" => RecordType::Warcinfo,
            "response" => RecordType::Response,
            "revisit"  => RecordType::Revisit,
            "resource" => RecordType::Resource,
            "request"  => RecordType::Request,
            "metadata" => RecordType::Metadata,
            other      => RecordType::Other(other.to_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RecordType::Warcinfo  => "warcinfo",
            RecordType::Response  => "response",
            RecordType::Revisit   => "revisit",
            RecordType::Resource  => "resource",
            RecordType::Request   => "request",
            RecordType::Metadata  => "metadata",
            RecordType::Filedesc  => "filedesc",
            RecordType::Other(s)  => s,
        }
    }
}

/// Which header family the record was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Warc,
    Arc,
}

// ── Payload access ───────────────────────────────────────────────────────────

/// Byte source for one record's block, bounded by the declared length when
/// one exists. Filedesc payloads are buffered because the parser must read
/// them to learn the file's header layout.
pub enum Body<'a> {
    Unit {
        stream:    &'a mut dyn RecordStream,
        remaining: Option<u64>,
        pushback:  Vec<u8>,
    },
    Buffered(Cursor<Vec<u8>>),
}

impl<'a> Body<'a> {
    pub fn from_stream(stream: &'a mut dyn RecordStream, remaining: Option<u64>) -> Self {
        Body::Unit { stream, remaining, pushback: Vec::new() }
    }

    /// Look at up to `n` leading bytes without consuming them.
    pub fn peek(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut head = vec![0u8; n];
        let mut got = 0;
        while got < n {
            let r = self.read(&mut head[got..])?;
            if r == 0 {
                break;
            }
            got += r;
        }
        head.truncate(got);
        match self {
            Body::Unit { remaining, pushback, .. } => {
                let mut restored = head.clone();
                restored.extend_from_slice(pushback);
                *pushback = restored;
                if let Some(r) = remaining {
                    *r += got as u64;
                }
            }
            Body::Buffered(c) => {
                let pos = c.position() - got as u64;
                c.set_position(pos);
            }
        }
        Ok(head)
    }

    /// Read the body to exhaustion, discarding bytes.
    pub fn drain(&mut self) -> io::Result<u64> {
        let mut scratch = [0u8; 8192];
        let mut total = 0u64;
        loop {
            match self.read(&mut scratch) {
                Ok(0) => return Ok(total),
                Ok(n) => total += n as u64,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

impl Read for Body<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Body::Unit { stream, remaining, pushback } => {
                if !pushback.is_empty() {
                    let n = pushback.len().min(out.len());
                    out[..n].copy_from_slice(&pushback[..n]);
                    pushback.drain(..n);
                    if let Some(r) = remaining {
                        *r = r.saturating_sub(n as u64);
                    }
                    return Ok(n);
                }
                let cap = match remaining {
                    Some(r) => (*r).min(out.len() as u64) as usize,
                    None => out.len(),
                };
                if cap == 0 {
                    return Ok(0);
                }
                let n = stream.read_unit(&mut out[..cap])?;
                if let Some(r) = remaining {
                    *r -= n as u64;
                }
                Ok(n)
            }
            Body::Buffered(c) => c.read(out),
        }
    }
}

// ── LogicalRecord ────────────────────────────────────────────────────────────

pub struct LogicalRecord<'a> {
    pub record_type:    RecordType,
    pub family:         Family,
    pub headers:        HeaderMap,
    /// Byte offset of the record's unit in the physical file.
    pub start_offset:   u64,
    pub url:            Option<String>,
    /// Raw, un-normalized date value from the record header.
    pub date:           Option<String>,
    pub content_length: Option<i64>,
    /// Record-level content type (WARC `Content-Type` header or the ARC
    /// summary-line field).
    pub content_type:   Option<String>,
    pub ip_address:     Option<String>,
    pub body:           Body<'a>,
}

impl<'a> LogicalRecord<'a> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Declared digest header, stripped of its `sha1:` prefix.
    pub fn declared_digest(&self, header: &str) -> Option<String> {
        self.header(header)
            .map(|v| v.trim().trim_start_matches("sha1:").to_owned())
            .filter(|v| !v.is_empty())
    }

    /// Hand the payload off (e.g. to the HTTP parser), leaving an empty
    /// body behind.
    pub fn take_body(&mut self) -> Body<'a> {
        std::mem::replace(&mut self.body, Body::Buffered(Cursor::new(Vec::new())))
    }
}
