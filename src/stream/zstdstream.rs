//! Zstd frame-per-record framing.
//!
//! Each frame is one record and decompression must not run across a frame
//! boundary, so the decoder runs in single-frame mode. The decoder wraps
//! the offset reader in its own `BufReader`; whatever that buffer read past
//! the frame end is handed back by seeking the offset reader backwards when
//! the unit finishes, leaving the cursor exactly at the next frame start.
//!
//! An optional *skippable* frame at the start of the file (magic in the
//! 0x184D2A50..=0x184D2A5F range, then a LE u32 payload length) may carry a
//! shared decompression dictionary. The payload is only treated as a
//! dictionary when it begins with the dictionary magic `37 A4 30 EC`;
//! anything else leaves the effective dictionary empty.

use std::io::{self, BufReader, Read, Seek};

use byteorder::{LittleEndian, ReadBytesExt};
use zstd::stream::read::Decoder;

use super::buf::OffsetReader;
use super::{CodecKind, RecordStream, ZSTD_FRAME_MAGIC};

const OUT_BUF: usize = 16 * 1024;

const SKIPPABLE_MIN: u32 = 0x184D_2A50;
const SKIPPABLE_MAX: u32 = 0x184D_2A5F;
const DICT_MAGIC: [u8; 4] = [0x37, 0xa4, 0x30, 0xec];
/// Refuse to load absurd dictionary frames.
const MAX_DICT_LEN: u32 = 128 * 1024 * 1024;

enum State<R: Read + Seek> {
    Idle(OffsetReader<R>),
    InUnit(Decoder<'static, BufReader<OffsetReader<R>>>),
    Poisoned,
}

pub struct ZstdStream<R: Read + Seek> {
    state:       State<R>,
    dict:        Vec<u8>,
    unit_start:  u64,
    at_unit_end: bool,
    obuf:        Box<[u8]>,
    opos:        usize,
    ocap:        usize,
}

impl<R: Read + Seek> ZstdStream<R> {
    /// Open the stream, discovering a leading skippable-frame dictionary.
    pub fn open(mut raw: OffsetReader<R>) -> io::Result<Self> {
        let dict = match discover_dictionary(&mut raw) {
            Ok(d) => d,
            Err(e) => {
                // A file too short for a frame header will fail again with
                // a classifiable error on the first unit.
                log::debug!("no zstd dictionary frame: {e}");
                raw.seek_to(0)?;
                Vec::new()
            }
        };
        if !dict.is_empty() {
            log::debug!("loaded {} byte zstd dictionary from skippable frame", dict.len());
        }
        Ok(ZstdStream {
            state:       State::Idle(raw),
            dict,
            unit_start:  0,
            at_unit_end: true,
            obuf:        vec![0u8; OUT_BUF].into_boxed_slice(),
            opos:        0,
            ocap:        0,
        })
    }

    fn reclaim_raw(&mut self) -> io::Result<()> {
        match std::mem::replace(&mut self.state, State::Poisoned) {
            State::Idle(raw) => {
                self.state = State::Idle(raw);
                Ok(())
            }
            State::InUnit(dec) => {
                self.state = State::Idle(recover_raw(dec)?);
                Ok(())
            }
            State::Poisoned => Err(poisoned()),
        }
    }
}

/// Take the decoder apart and reposition the offset reader at the first
/// byte the decoder's buffer read but did not use.
fn recover_raw<R: Read + Seek>(
    dec: Decoder<'static, BufReader<OffsetReader<R>>>,
) -> io::Result<OffsetReader<R>> {
    let br = dec.finish();
    let overread = br.buffer().len() as u64;
    let mut raw = br.into_inner();
    let pos = raw.position() - overread;
    raw.seek_to(pos)?;
    Ok(raw)
}

fn poisoned() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "zstd stream poisoned by earlier failure")
}

/// Inspect the file head for a skippable dictionary frame. On success the
/// reader is positioned after the frame; on any rejection the caller seeks
/// back to 0.
fn discover_dictionary<R: Read + Seek>(raw: &mut OffsetReader<R>) -> io::Result<Vec<u8>> {
    let magic = raw.read_u32::<LittleEndian>()?;
    if !(SKIPPABLE_MIN..=SKIPPABLE_MAX).contains(&magic) {
        raw.seek_to(0)?;
        return Ok(Vec::new());
    }
    let len = raw.read_u32::<LittleEndian>()?;
    if len > MAX_DICT_LEN {
        raw.seek_to(0)?;
        return Ok(Vec::new());
    }
    let mut payload = vec![0u8; len as usize];
    raw.read_exact(&mut payload)?;
    if payload.starts_with(&DICT_MAGIC) {
        Ok(payload)
    } else {
        // Skippable frame with some other payload; records start after it.
        Ok(Vec::new())
    }
}

impl<R: Read + Seek> RecordStream for ZstdStream<R> {
    fn kind(&self) -> CodecKind {
        CodecKind::ZstdPerFrame
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
                let dec = if self.dict.is_empty() {
                    Decoder::new(raw)?
                } else {
                    Decoder::with_dictionary(BufReader::new(raw), &self.dict)?
                };
                self.state = State::InUnit(dec.single_frame());
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
                let raw = recover_raw(dec)?;
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
            // Mid-unit the physical cursor is only pinned down at
            // finish_unit; report the unit start.
            State::InUnit(_) => self.unit_start,
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

        let mut win = [0u8; 4];
        let mut have = 0usize;
        let mut byte = [0u8; 1];
        loop {
            let n = raw.read(&mut byte)?;
            if n == 0 {
                return Ok(false);
            }
            win.rotate_left(1);
            win[3] = byte[0];
            have += 1;
            if have >= 4 && win == ZSTD_FRAME_MAGIC {
                let pos = raw.position() - 4;
                raw.seek_to(pos)?;
                return Ok(true);
            }
        }
    }
}
