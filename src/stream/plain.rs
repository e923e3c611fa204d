//! Uncompressed archives. Units have no physical framing: a unit begins at
//! the first non-separator byte and the record parser discovers its extent
//! from declared lengths. Blank separator lines between records belong to
//! no unit and are skipped by `next_unit`.

use std::io::{self, BufRead, Read, Seek};

use super::buf::OffsetReader;
use super::{CodecKind, RecordStream};

pub struct PlainStream<R: Read + Seek> {
    raw: OffsetReader<R>,
}

impl<R: Read + Seek> PlainStream<R> {
    pub fn new(raw: OffsetReader<R>) -> Self {
        PlainStream { raw }
    }
}

/// Line prefixes that can begin a record. Used only for resynchronization.
const RECORD_STARTS: &[&[u8]] = &[b"WARC/", b"filedesc://", b"http://", b"https://"];

impl<R: Read + Seek> RecordStream for PlainStream<R> {
    fn kind(&self) -> CodecKind {
        CodecKind::Plain
    }

    fn next_unit(&mut self) -> io::Result<Option<u64>> {
        // Skip record separators (ARC: one LF, WARC: two CRLF).
        loop {
            let avail = self.raw.fill_buf()?;
            if avail.is_empty() {
                return Ok(None);
            }
            let skip = avail.iter().take_while(|&&b| b == b'\r' || b == b'\n').count();
            if skip == 0 {
                break;
            }
            self.raw.consume(skip);
        }
        Ok(Some(self.raw.position()))
    }

    fn fill_unit_buf(&mut self) -> io::Result<&[u8]> {
        self.raw.fill_buf()
    }

    fn consume_unit(&mut self, amt: usize) {
        self.raw.consume(amt);
    }

    fn finish_unit(&mut self) -> io::Result<u64> {
        // The record parser consumed the record's own extent; whatever
        // follows is the next unit's problem.
        Ok(self.raw.position())
    }

    fn position(&self) -> u64 {
        self.raw.position()
    }

    fn resync_from(&mut self, offset: u64) -> io::Result<bool> {
        self.raw.seek_to(offset)?;
        loop {
            // A prefix split across the buffer boundary can be missed here;
            // the scan then settles on a later record, which recovery
            // tolerates.
            let head = self.raw.peek(16)?;
            if head.is_empty() {
                return Ok(false);
            }
            if RECORD_STARTS.iter().any(|p| head.starts_with(p)) {
                return Ok(true);
            }
            // Skip past the next newline without buffering the line.
            loop {
                let avail = self.raw.fill_buf()?;
                if avail.is_empty() {
                    return Ok(false);
                }
                match avail.iter().position(|&b| b == b'\n') {
                    Some(i) => {
                        self.raw.consume(i + 1);
                        break;
                    }
                    None => {
                        let n = avail.len();
                        self.raw.consume(n);
                    }
                }
            }
        }
    }
}
