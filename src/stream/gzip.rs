//! Gzip member-per-record framing.
//!
//! Each compressed member is exactly one record. The decoder consumes the
//! member's bytes (header, deflate stream, trailer) from the offset reader
//! and nothing more, so member boundaries fall out of the offset reader's
//! accounting. A zero-length member (valid gzip encoding of empty content)
//! reports end-of-member before producing a payload byte; it is a unit that
//! yields no record, not end of file.

use std::io::{self, Read, Seek};

use flate2::bufread::GzDecoder;

use super::buf::OffsetReader;
use super::{CodecKind, RecordStream, GZIP_MAGIC};

const OUT_BUF: usize = 16 * 1024;

enum State<R: Read + Seek> {
    Idle(OffsetReader<R>),
    InUnit(GzDecoder<OffsetReader<R>>),
    Poisoned,
}

pub struct GzipStream<R: Read + Seek> {
    state:       State<R>,
    unit_start:  u64,
    at_unit_end: bool,
    obuf:        Box<[u8]>,
    opos:        usize,
    ocap:        usize,
}

impl<R: Read + Seek> GzipStream<R> {
    pub fn new(raw: OffsetReader<R>) -> Self {
        GzipStream {
            state:       State::Idle(raw),
            unit_start:  0,
            at_unit_end: true,
            obuf:        vec![0u8; OUT_BUF].into_boxed_slice(),
            opos:        0,
            ocap:        0,
        }
    }

    fn reclaim_raw(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Idle(raw) => {
                self.state = State::Idle(raw);
                Ok(())
            }
            State::InUnit(dec) => {
                self.state = State::Idle(dec.into_inner());
                Ok(())
            }
            State::Poisoned => Err(poisoned()),
        }
    }
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "gzip stream poisoned by earlier failure")
}

impl<R: Read + Seek> RecordStream for GzipStream<R> {
    fn kind(&self) -> CodecKind {
        CodecKind::GzipPerRecord
    }

    fn next_unit(&mut self) -> io::Result<Option<u64>> {
        self.finish_unit()?;
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Idle(mut raw) => {
                if raw.at_eof()? {
                    self.state = State::Idle(raw);
                    return Ok(None);
                }
                self.unit_start = raw.position();
                self.state = State::InUnit(GzDecoder::new(raw));
                self.at_unit_end = false;
                self.opos = 0;
                self.ocap = 0;
                Ok(Some(self.unit_start))
            }
            _ => Err(poisoned()),
        }
    }

    fn fill_unit_buf(&mut self) -> io::Result<&[u8]> {
        if self.opos >= self.ocap && !self.at_unit_end {
            match &mut self.state {
                State::InUnit(dec) => {
                    self.ocap = dec.read(&mut self.obuf)?;
                    self.opos = 0;
                    if self.ocap == 0 {
                        self.at_unit_end = true;
                    }
                }
                State::Idle(_) => self.at_unit_end = true,
                State::Poisoned => return Err(poisoned()),
            }
        }
        if self.at_unit_end && self.opos >= self.ocap {
            return Ok(&[]);
        }
        Ok(&self.obuf[self.opos..self.ocap])
    }

    fn consume_unit(&mut self, amt: usize) {
        self.opos = (self.opos + amt).min(self.ocap);
    }

    fn finish_unit(&mut self) -> io::Result<u64> {
        self.opos = 0;
        self.ocap = 0;
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Idle(raw) => {
                let pos = raw.position();
                self.state = State::Idle(raw);
                Ok(pos)
            }
            State::InUnit(mut dec) => {
                let mut fail = None;
                if !self.at_unit_end {
                    let mut scratch = [0u8; 8192];
                    loop {
                        match dec.read(&mut scratch) {
                            Ok(0) => break,
                            Ok(_) => {}
                            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                            Err(e) => {
                                fail = Some(e);
                                break;
                            }
                        }
                    }
                }
                let raw = dec.into_inner();
                let pos = raw.position();
                self.state = State::Idle(raw);
                self.at_unit_end = true;
                match fail {
                    Some(e) => Err(e),
                    None => Ok(pos),
                }
            }
            State::Poisoned => Err(poisoned()),
        }
    }

    fn position(&self) -> u64 {
        match &self.state {
            State::Idle(raw) => raw.position(),
            State::InUnit(dec) => dec.get_ref().position(),
            State::Poisoned => self.unit_start,
        }
    }

    fn resync_from(&mut self, offset: u64) -> io::Result<bool> {
        self.reclaim_raw()?;
        self.at_unit_end = true;
        self.opos = 0;
        self.ocap = 0;
        let raw = match &mut self.state {
            State::Idle(raw) => raw,
            _ => return Err(poisoned()),
        };
        raw.seek_to(offset)?;

        // Rolling three-byte window over the raw bytes; a gzip member
        // starts with 1f 8b 08 (deflate is the only method in the wild).
        let mut win = [0u8; 3];
        let mut have = 0usize;
        let mut byte = [0u8; 1];
        loop {
            let n = raw.read(&mut byte)?;
            if n == 0 {
                return Ok(false);
            }
            win.rotate_left(1);
            win[2] = byte[0];
            have += 1;
            if have >= 3 && win[0] == GZIP_MAGIC[0] && win[1] == GZIP_MAGIC[1] && win[2] == 0x08 {
                let pos = raw.position() - 3;
                raw.seek_to(pos)?;
                return Ok(true);
            }
        }
    }
}
