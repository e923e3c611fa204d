//! Lenient HTTP response parsing for archived payloads.
//!
//! Archived responses violate the RFCs in every way a server can manage:
//! unknown protocol tokens, tens of thousands of header-like lines, chunked
//! declarations over identity bodies, captures truncated mid-chunk. This
//! parser is a small status-line → headers → body state machine that
//! prefers producing *something* over failing; the only hard error is a
//! header line larger than the memory bound.

use std::io::{self, Read};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CdxError;
use crate::headers::HeaderMap;
use crate::record::Body;

/// Upper bound on one header line. Generous: archived pages carry
/// multi-kilobyte cookies and URLs, but a line that never ends is corrupt.
const MAX_HTTP_LINE: usize = 1024 * 1024;

/// Low-value headers dropped during accumulation to bound memory on
/// pathological responses. Everything else is preserved in order,
/// including repeats.
const DROPPED_HEADERS: &[&str] = &[
    "set-cookie",
    "set-cookie2",
    "cookie",
    "cache-control",
    "expires",
    "pragma",
    "age",
    "via",
    "p3p",
    "x-cache",
    "x-cache-lookup",
    "x-served-by",
    "x-timer",
    "x-powered-by",
    "strict-transport-security",
    "content-security-policy",
    "content-security-policy-report-only",
    "public-key-pins",
    "x-xss-protection",
    "x-content-type-options",
    "x-frame-options",
];

static RE_STATUS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^HTTP(?:/(\d+)\.(\d+))?[ \t]+(\d+)[ \t]*(.*)$").unwrap());

// ── Message ──────────────────────────────────────────────────────────────────

pub struct HttpMessage<'a> {
    /// 9, 10 or 11.
    pub version: u8,
    pub status:  u16,
    pub reason:  String,
    pub headers: HeaderMap,
    body:        HttpBody<'a>,
}

impl<'a> HttpMessage<'a> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Raw Content-Type header value, parameters included.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type")
    }

    pub fn body_mut(&mut self) -> &mut HttpBody<'a> {
        &mut self.body
    }

    /// Read any record bytes left behind the message body (identity bodies
    /// shorter than the record block, chunked trailers, padding). Needed so
    /// the record is fully consumed before the next unit is measured.
    pub fn drain_rest(&mut self) -> io::Result<u64> {
        let mut total = 0u64;
        let mut scratch = [0u8; 8192];
        loop {
            let n = self.body.lines.read_raw(&mut scratch)?;
            if n == 0 {
                return Ok(total);
            }
            total += n as u64;
        }
    }
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse the status line and header block, leaving `body` framed and
/// positioned at the first payload byte.
pub fn parse<'a>(body: Body<'a>) -> Result<HttpMessage<'a>, CdxError> {
    let mut lines = LineReader::new(body);

    let (version, status, reason, raw_09) = match lines.read_line(MAX_HTTP_LINE)? {
        None => (9u8, 200u16, String::new(), false),
        Some(line) => {
            let text = String::from_utf8_lossy(trim_crlf(&line)).into_owned();
            match parse_status_line(&text) {
                Some((v, s, r)) => (v, s, r, false),
                None => {
                    // Not a status line at all: HTTP/0.9 semantics, the
                    // whole payload (this line included) is the body.
                    lines.push_front(&line);
                    (9, 200, String::new(), true)
                }
            }
        }
    };

    let mut headers = HeaderMap::new();
    if !raw_09 {
        let mut last_dropped = false;
        loop {
            let Some(line) = lines.read_line(MAX_HTTP_LINE)? else {
                break;
            };
            let text = String::from_utf8_lossy(trim_crlf(&line)).into_owned();
            if text.is_empty() {
                break;
            }
            if text.starts_with(' ') || text.starts_with('\t') {
                if !last_dropped {
                    headers.append_continuation(text.trim());
                }
                continue;
            }
            match text.split_once(':') {
                Some((name, value)) => {
                    let name = name.trim();
                    if DROPPED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                        last_dropped = true;
                        continue;
                    }
                    headers.append(name, value.trim());
                    last_dropped = false;
                }
                None => {
                    if !last_dropped {
                        headers.append_continuation(text.trim());
                    }
                }
            }
        }
    }

    let declared_chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    // A negative or unparsable Content-Length means unknown, never zero.
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v >= 0)
        .map(|v| v as u64);

    let zero_body = status == 204 || status == 304 || (100..200).contains(&status);
    let framing = if zero_body {
        Framing::Empty
    } else if declared_chunked && sniff_chunked(&mut lines)? {
        Framing::Chunked(ChunkPhase::Size)
    } else {
        // Defends against responses that declare chunked but are not:
        // their Content-Length is untrustworthy too, so read to the end
        // of the record block.
        let remaining = if declared_chunked { None } else { content_length };
        Framing::Identity { remaining }
    };

    Ok(HttpMessage {
        version,
        status,
        reason,
        headers,
        body: HttpBody { lines, framing },
    })
}

fn parse_status_line(text: &str) -> Option<(u8, u16, String)> {
    let caps = RE_STATUS_LINE.captures(text)?;
    let status: u16 = caps.get(3)?.as_str().parse().ok()?;
    let version = match (caps.get(1), caps.get(2)) {
        (Some(major), Some(minor)) => match (major.as_str(), minor.as_str()) {
            ("0", "9") => 9,
            ("1", "0") => 10,
            ("1", "1") => 11,
            // Unknown x.y tokens: keep the status, assume 1.0 behavior.
            _ => 10,
        },
        // "HTTP 200" with no version token.
        _ => 9,
    };
    let reason = caps.get(4).map_or("", |m| m.as_str()).trim().to_owned();
    Some((version, status, reason))
}

/// Chunked transfer is honored only when the body actually starts with a
/// hex chunk-size line.
fn sniff_chunked(lines: &mut LineReader<'_>) -> Result<bool, CdxError> {
    let head = lines.peek_line(64)?;
    Ok(looks_like_chunk_size(head))
}

fn looks_like_chunk_size(line: &[u8]) -> bool {
    let line = trim_crlf(line);
    let head = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    !head.is_empty() && head.len() <= 16 && head.iter().all(u8::is_ascii_hexdigit)
}

fn trim_crlf(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}

// ── Body framing ─────────────────────────────────────────────────────────────

enum Framing {
    /// 204/304/1xx: no body regardless of headers.
    Empty,
    Identity { remaining: Option<u64> },
    Chunked(ChunkPhase),
}

enum ChunkPhase {
    Size,
    Data(u64),
    Done,
}

pub struct HttpBody<'a> {
    lines:   LineReader<'a>,
    framing: Framing,
}

impl Read for HttpBody<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            match &mut self.framing {
                Framing::Empty => return Ok(0),
                Framing::Identity { remaining } => {
                    let cap = match remaining {
                        Some(r) => (*r).min(out.len() as u64) as usize,
                        None => out.len(),
                    };
                    if cap == 0 {
                        return Ok(0);
                    }
                    let n = self.lines.read_raw(&mut out[..cap])?;
                    if let Some(r) = remaining {
                        *r -= n as u64;
                    }
                    return Ok(n);
                }
                Framing::Chunked(phase) => match phase {
                    ChunkPhase::Done => return Ok(0),
                    ChunkPhase::Size => {
                        let line = match self.lines.read_line(MAX_HTTP_LINE) {
                            Ok(Some(l)) => l,
                            // Truncated capture: partial data already
                            // returned, stop cleanly.
                            Ok(None) | Err(_) => {
                                self.framing = Framing::Chunked(ChunkPhase::Done);
                                return Ok(0);
                            }
                        };
                        match parse_chunk_size(&line) {
                            Some(0) => {
                                self.consume_trailers();
                                self.framing = Framing::Chunked(ChunkPhase::Done);
                                return Ok(0);
                            }
                            Some(n) => {
                                self.framing = Framing::Chunked(ChunkPhase::Data(n));
                            }
                            None => {
                                // Garbage where a size line belongs; treat
                                // as end of usable body.
                                self.framing = Framing::Chunked(ChunkPhase::Done);
                                return Ok(0);
                            }
                        }
                    }
                    ChunkPhase::Data(left) => {
                        let cap = (*left).min(out.len() as u64) as usize;
                        let n = self.lines.read_raw(&mut out[..cap])?;
                        if n == 0 {
                            // Mid-chunk truncation: yield what was read.
                            self.framing = Framing::Chunked(ChunkPhase::Done);
                            return Ok(0);
                        }
                        *left -= n as u64;
                        if *left == 0 {
                            // Chunk-terminating CRLF.
                            let _ = self.lines.read_line(MAX_HTTP_LINE);
                            self.framing = Framing::Chunked(ChunkPhase::Size);
                        }
                        return Ok(n);
                    }
                },
            }
        }
    }
}

impl HttpBody<'_> {
    fn consume_trailers(&mut self) {
        // Trailers end at a blank line; tolerate EOF anywhere.
        for _ in 0..64 {
            match self.lines.read_line(MAX_HTTP_LINE) {
                Ok(Some(l)) if !trim_crlf(&l).is_empty() => continue,
                _ => break,
            }
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> Option<u64> {
    let line = trim_crlf(line);
    let head = match line.iter().position(|&b| b == b';') {
        Some(i) => &line[..i],
        None => line,
    };
    let text = std::str::from_utf8(head).ok()?;
    let text = text.trim();
    if text.is_empty() || text.len() > 16 {
        return None;
    }
    u64::from_str_radix(text, 16).ok()
}

// ── Buffered line reading over a record body ─────────────────────────────────

struct LineReader<'a> {
    inner: Body<'a>,
    buf:   Vec<u8>,
    pos:   usize,
    eof:   bool,
}

impl<'a> LineReader<'a> {
    fn new(inner: Body<'a>) -> Self {
        LineReader { inner, buf: Vec::new(), pos: 0, eof: false }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    fn fill_some(&mut self) -> io::Result<usize> {
        if self.eof {
            return Ok(0);
        }
        self.compact();
        let mut chunk = [0u8; 8192];
        let n = self.inner.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(n)
    }

    /// Next line including its terminator; `None` at end of data. `max`
    /// bounds the buffered length.
    fn read_line(&mut self, max: usize) -> Result<Option<Vec<u8>>, CdxError> {
        loop {
            if let Some(i) = self.buf[self.pos..].iter().position(|&b| b == b'\n') {
                let end = self.pos + i + 1;
                let line = self.buf[self.pos..end].to_vec();
                self.pos = end;
                return Ok(Some(line));
            }
            if self.buf.len() - self.pos > max {
                return Err(CdxError::Http(format!("header line exceeds {max} bytes")));
            }
            if self.fill_some()? == 0 {
                if self.pos < self.buf.len() {
                    let line = self.buf[self.pos..].to_vec();
                    self.pos = self.buf.len();
                    return Ok(Some(line));
                }
                return Ok(None);
            }
        }
    }

    /// Ensure the next line (or final fragment) is buffered and return it
    /// without consuming. Caps the look-ahead at `max` bytes.
    fn peek_line(&mut self, max: usize) -> Result<&[u8], CdxError> {
        loop {
            if self.buf[self.pos..].iter().any(|&b| b == b'\n')
                || self.buf.len() - self.pos >= max
                || self.eof
            {
                break;
            }
            self.fill_some()?;
        }
        let avail = &self.buf[self.pos..];
        let end = avail
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| i + 1)
            .unwrap_or(avail.len().min(max));
        Ok(&avail[..end])
    }

    fn push_front(&mut self, bytes: &[u8]) {
        self.compact();
        let mut restored = bytes.to_vec();
        restored.extend_from_slice(&self.buf);
        self.buf = restored;
        self.eof = self.eof && self.buf.is_empty();
    }

    /// Plain read: buffered bytes first, then the underlying body.
    fn read_raw(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.buf.len() {
            let n = (self.buf.len() - self.pos).min(out.len());
            out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }
        self.inner.read(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn body_of(bytes: &[u8]) -> Body<'static> {
        Body::Buffered(Cursor::new(bytes.to_vec()))
    }

    fn read_all(msg: &mut HttpMessage<'_>) -> Vec<u8> {
        let mut out = Vec::new();
        msg.body_mut().read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn ordinary_response() {
        let mut msg = parse(body_of(
            b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\ntest\n",
        ))
        .unwrap();
        assert_eq!(msg.version, 10);
        assert_eq!(msg.status, 200);
        assert_eq!(msg.reason, "OK");
        assert_eq!(msg.content_type(), Some("text/plain"));
        assert_eq!(read_all(&mut msg), b"test\n");
    }

    #[test]
    fn unknown_protocol_token_keeps_status() {
        let mut msg = parse(body_of(b"HTTP/0.0 400 Bad Request\r\nContent-Length: 0\r\n\r\n"))
            .unwrap();
        assert_eq!(msg.version, 10);
        assert_eq!(msg.status, 400);
        assert_eq!(msg.reason, "Bad Request");
        assert_eq!(read_all(&mut msg), b"");
    }

    #[test]
    fn garbage_status_line_synthesizes_09() {
        let mut msg = parse(body_of(b"<html>hello</html>")).unwrap();
        assert_eq!(msg.version, 9);
        assert_eq!(msg.status, 200);
        assert_eq!(msg.reason, "");
        // The whole payload is the body.
        assert_eq!(read_all(&mut msg), b"<html>hello</html>");
    }

    #[test]
    fn empty_payload_synthesizes_09() {
        let mut msg = parse(body_of(b"")).unwrap();
        assert_eq!((msg.version, msg.status), (9, 200));
        assert_eq!(read_all(&mut msg), b"");
    }

    #[test]
    fn status_304_forces_empty_body() {
        let mut msg = parse(body_of(
            b"HTTP/1.1 304 Not Modified\r\nContent-Length: 512\r\n\r\nstale bytes here",
        ))
        .unwrap();
        assert_eq!(msg.status, 304);
        assert_eq!(read_all(&mut msg), b"");
    }

    #[test]
    fn chunked_body_is_decoded() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
            5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let mut msg = parse(body_of(raw)).unwrap();
        assert_eq!(read_all(&mut msg), b"hello world");
    }

    #[test]
    fn declared_chunked_but_identity_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n<html>not chunked</html>";
        let mut msg = parse(body_of(raw)).unwrap();
        assert_eq!(read_all(&mut msg), b"<html>not chunked</html>");
    }

    #[test]
    fn truncated_chunk_yields_partial_bytes() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\nff\r\nonly a few bytes";
        let mut msg = parse(body_of(raw)).unwrap();
        assert_eq!(read_all(&mut msg), b"only a few bytes");
    }

    #[test]
    fn content_length_bounds_identity_body() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Length: 4\r\n\r\nabcdEXTRA";
        let mut msg = parse(body_of(raw)).unwrap();
        assert_eq!(read_all(&mut msg), b"abcd");
        // The surplus is still reachable for record accounting.
        assert_eq!(msg.drain_rest().unwrap(), 5);
    }

    #[test]
    fn negative_content_length_means_unknown() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Length: -1\r\n\r\neverything";
        let mut msg = parse(body_of(raw)).unwrap();
        assert_eq!(read_all(&mut msg), b"everything");
    }

    #[test]
    fn dropped_headers_do_not_accumulate() {
        let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nX-Robots-Tag: noindex\r\nContent-Length: 0\r\n\r\n";
        let msg = parse(body_of(raw)).unwrap();
        assert_eq!(msg.header("set-cookie"), None);
        assert_eq!(msg.header("x-robots-tag"), Some("noindex"));
    }

    #[test]
    fn repeated_headers_preserved_in_order() {
        let raw = b"HTTP/1.1 200 OK\r\nX-A: 1\r\nX-A: 2\r\nContent-Length: 0\r\n\r\n";
        let msg = parse(body_of(raw)).unwrap();
        assert_eq!(msg.headers.iter().filter(|(n, _)| *n == "X-A").count(), 2);
    }

    #[test]
    fn lf_only_header_terminator() {
        let raw = b"HTTP/1.0 200 OK\nContent-Length: 2\n\nhi";
        let mut msg = parse(body_of(raw)).unwrap();
        assert_eq!(msg.status, 200);
        assert_eq!(read_all(&mut msg), b"hi");
    }
}
