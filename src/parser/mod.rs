//! Record header parsing for both archive families.
//!
//! The parser consumes the front of one codec unit and produces a
//! [`LogicalRecord`] whose body is positioned at the first content byte.
//! It is stateful per file: ARC files declare their own summary-line layout
//! in the leading filedesc record, and the family sticks once detected.

pub mod arc;

use std::io::{Cursor, Read};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::CdxError;
use crate::headers::HeaderMap;
use crate::record::{Body, Family, LogicalRecord, RecordType};
use crate::stream::{read_unit_line, RecordStream, MAX_HEADER_LINE};

use arc::{ArcField, LAYOUT_V1, RE_BARE_SUMMARY};

/// Filedesc bodies are tiny; anything bigger is consumed but not parsed
/// for a layout declaration.
const MAX_FILEDESC_BODY: usize = 1024 * 1024;

static RE_WRAPPED_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<(.*)>$").unwrap());

pub struct RecordParser {
    family:     Option<Family>,
    arc_layout: Vec<ArcField>,
}

impl Default for RecordParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordParser {
    pub fn new() -> Self {
        RecordParser {
            family:     None,
            arc_layout: LAYOUT_V1.to_vec(),
        }
    }

    /// Parse one record from the current unit. `Ok(None)` means the unit
    /// held no record at all (empty gzip member, trailing separator run).
    pub fn parse_record<'a>(
        &mut self,
        stream: &'a mut dyn RecordStream,
        offset: u64,
    ) -> Result<Option<LogicalRecord<'a>>, CdxError> {
        let mut line = Vec::new();
        loop {
            let n = read_unit_line(stream, &mut line, MAX_HEADER_LINE)?;
            if n == 0 {
                return Ok(None);
            }
            if !line.iter().all(|&b| b == b'\r' || b == b'\n') {
                break;
            }
        }

        let first = String::from_utf8_lossy(&line).into_owned();
        let first = first.trim_end_matches(['\r', '\n']);

        if first.starts_with("WARC/") {
            self.family = Some(Family::Warc);
            return self.parse_warc(stream, offset).map(Some);
        }

        match self.family {
            Some(Family::Warc) => Err(CdxError::HeaderFormat(format!(
                "expected WARC version line, got: {}",
                clip(first)
            ))),
            Some(Family::Arc) => self.parse_arc(stream, offset, first).map(Some),
            None => {
                if first.starts_with("filedesc://") || RE_BARE_SUMMARY.is_match(first) {
                    self.family = Some(Family::Arc);
                    self.parse_arc(stream, offset, first).map(Some)
                } else {
                    Err(CdxError::HeaderFormat(format!(
                        "unrecognized record start: {}",
                        clip(first)
                    )))
                }
            }
        }
    }

    // ── WARC ─────────────────────────────────────────────────────────────────

    fn parse_warc<'a>(
        &mut self,
        stream: &'a mut dyn RecordStream,
        offset: u64,
    ) -> Result<LogicalRecord<'a>, CdxError> {
        let mut headers = HeaderMap::new();
        let mut line = Vec::new();
        loop {
            let n = read_unit_line(stream, &mut line, MAX_HEADER_LINE)?;
            if n == 0 {
                break;
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if text.is_empty() {
                break;
            }
            if text.starts_with(' ') || text.starts_with('\t') {
                headers.append_continuation(text.trim());
                continue;
            }
            match text.split_once(':') {
                Some((name, value)) => headers.append(name.trim(), value.trim()),
                // Not header-shaped; fold into the previous value rather
                // than losing the bytes.
                None => headers.append_continuation(text.trim()),
            }
        }

        let record_type = headers
            .get("WARC-Type")
            .map(RecordType::from_warc)
            .unwrap_or(RecordType::Other("unknown".into()));
        let url = headers.get("WARC-Target-URI").map(unwrap_uri);
        let date = headers.get("WARC-Date").map(str::to_owned);
        let content_length = headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<i64>().ok());
        let content_type = headers.get("Content-Type").map(str::to_owned);
        let ip_address = headers.get("WARC-IP-Address").map(str::to_owned);

        let remaining = content_length.filter(|l| *l >= 0).map(|l| l as u64);
        Ok(LogicalRecord {
            record_type,
            family: Family::Warc,
            headers,
            start_offset: offset,
            url,
            date,
            content_length,
            content_type,
            ip_address,
            body: Body::from_stream(stream, remaining),
        })
    }

    // ── ARC ──────────────────────────────────────────────────────────────────

    fn parse_arc<'a>(
        &mut self,
        stream: &'a mut dyn RecordStream,
        offset: u64,
        line: &str,
    ) -> Result<LogicalRecord<'a>, CdxError> {
        let header = arc::parse_summary_line(line, &self.arc_layout)?;

        let is_filedesc = header
            .url
            .as_deref()
            .is_some_and(|u| u.starts_with("filedesc"));

        let mut headers = HeaderMap::new();
        if let Some(v) = &header.url {
            headers.append("URL", v.clone());
        }
        if let Some(v) = &header.ip {
            headers.append("IP-address", v.clone());
        }
        if let Some(v) = &header.date {
            headers.append("Archive-date", v.clone());
        }
        if let Some(v) = &header.content_type {
            headers.append("Content-type", v.clone());
        }
        if let Some(l) = header.length {
            headers.append("Archive-length", l.to_string());
        }
        if let Some(v) = &header.result_code {
            headers.append("Result-code", v.clone());
        }
        if let Some(v) = &header.checksum {
            headers.append("Checksum", v.clone());
        }
        if let Some(v) = &header.location {
            headers.append("Location", v.clone());
        }

        let record_type = if is_filedesc {
            RecordType::Filedesc
        } else {
            RecordType::Response
        };

        let remaining = header.length.filter(|l| *l >= 0).map(|l| l as u64);
        let body = if is_filedesc {
            // The filedesc body declares the summary-line layout for the
            // rest of the file; buffer it so it can be both parsed here and
            // digested downstream.
            let want = remaining.unwrap_or(0).min(MAX_FILEDESC_BODY as u64) as usize;
            let mut buf = vec![0u8; want];
            let mut tmp = Body::from_stream(stream, remaining);
            let mut got = 0;
            while got < want {
                let n = tmp.read(&mut buf[got..])?;
                if n == 0 {
                    break;
                }
                got += n;
            }
            buf.truncate(got);
            if let Some(layout) = arc::layout_from_filedesc(&buf) {
                self.arc_layout = layout;
            }
            Body::Buffered(Cursor::new(buf))
        } else {
            Body::from_stream(stream, remaining)
        };

        Ok(LogicalRecord {
            record_type,
            family: Family::Arc,
            headers,
            start_offset: offset,
            url: header.url,
            date: header.date,
            content_length: header.length,
            content_type: header.content_type,
            ip_address: header.ip,
            body,
        })
    }
}

/// Some wget versions wrap WARC-Target-URI in angle brackets.
fn unwrap_uri(raw: &str) -> String {
    match RE_WRAPPED_URI.captures(raw) {
        Some(caps) => caps[1].to_owned(),
        None => raw.to_owned(),
    }
}

fn clip(line: &str) -> String {
    if line.chars().count() > 80 {
        let head: String = line.chars().take(80).collect();
        format!("{head}...")
    } else {
        line.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{OffsetReader, PlainStream, RecordStream};
    use std::io::Cursor as IoCursor;

    fn plain(data: &[u8]) -> PlainStream<IoCursor<Vec<u8>>> {
        PlainStream::new(OffsetReader::new(IoCursor::new(data.to_vec())))
    }

    #[test]
    fn warc_headers_with_continuation() {
        let data = b"WARC/1.0\r\n\
            WARC-Type: response\r\n\
            WARC-Target-URI: <http://example.com/>\r\n\
            WARC-Date: 2010-09-26T11:23:46Z\r\n\
            X-Folded: one\r\n\
            \x20two\r\n\
            Content-Length: 4\r\n\
            \r\n\
            body\r\n\r\n";
        let mut s = plain(data);
        let off = s.next_unit().unwrap().unwrap();
        let mut p = RecordParser::new();
        let mut rec = p.parse_record(&mut s, off).unwrap().unwrap();
        assert_eq!(rec.record_type, RecordType::Response);
        assert_eq!(rec.url.as_deref(), Some("http://example.com/"));
        assert_eq!(rec.headers.get("x-folded"), Some("one two"));
        assert_eq!(rec.content_length, Some(4));
        let mut body = Vec::new();
        rec.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"body");
    }

    #[test]
    fn arc_filedesc_declares_layout() {
        let content = b"1 1 InternetArchive\nURL IP-address Archive-date Content-type Archive-length\n";
        let mut data = Vec::new();
        data.extend_from_slice(
            format!(
                "filedesc://a.arc 0.0.0.0 20160209153640 text/plain {}\n",
                content.len()
            )
            .as_bytes(),
        );
        data.extend_from_slice(content);
        data.extend_from_slice(b"\nhttp://example.com/ 1.2.3.4 20160209000000 text/html 5\nhello\n");

        let mut s = plain(&data);
        let mut p = RecordParser::new();

        let off = s.next_unit().unwrap().unwrap();
        let mut rec = p.parse_record(&mut s, off).unwrap().unwrap();
        assert_eq!(rec.record_type, RecordType::Filedesc);
        let mut body = Vec::new();
        rec.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, content);
        drop(rec);
        s.finish_unit().unwrap();

        let off = s.next_unit().unwrap().unwrap();
        let mut rec = p.parse_record(&mut s, off).unwrap().unwrap();
        assert_eq!(rec.record_type, RecordType::Response);
        assert_eq!(rec.url.as_deref(), Some("http://example.com/"));
        assert_eq!(rec.ip_address.as_deref(), Some("1.2.3.4"));
        let mut body = Vec::new();
        rec.body.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"hello");
    }

    #[test]
    fn bare_summary_seeds_arc_family() {
        let data = b"http://example.com/ 1.2.3.4 20100926112346 text/plain 2\nhi\n";
        let mut s = plain(data);
        let mut p = RecordParser::new();
        let off = s.next_unit().unwrap().unwrap();
        let rec = p.parse_record(&mut s, off).unwrap().unwrap();
        assert_eq!(rec.record_type, RecordType::Response);
        assert_eq!(rec.content_length, Some(2));
    }

    #[test]
    fn garbage_first_line_is_header_error() {
        let data = b"%%%% nothing like a record\n";
        let mut s = plain(data);
        let mut p = RecordParser::new();
        let off = s.next_unit().unwrap().unwrap();
        assert!(matches!(
            p.parse_record(&mut s, off),
            Err(CdxError::HeaderFormat(_))
        ));
    }
}
