//! Container codec layer.
//!
//! A physical archive file is a sequence of *units*, each framing exactly
//! one logical record: a raw byte range (plain), one gzip member, or one
//! zstd frame. The codec strategy is chosen once at open time by filename
//! extension and magic sniffing; there is no runtime negotiation and no
//! global registry.
//!
//! Offsets reported by `next_unit`/`finish_unit` are absolute positions in
//! the *physical* file, which is what index consumers seek to.

pub mod buf;
mod gzip;
mod plain;
mod zstdstream;

use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::Path;

pub use buf::OffsetReader;
pub use gzip::GzipStream;
pub use plain::PlainStream;
pub use zstdstream::ZstdStream;

use crate::error::CdxError;

/// Longest header line the record parser will buffer from a unit.
pub const MAX_HEADER_LINE: usize = 64 * 1024;

// ── Codec selection ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Plain,
    GzipPerRecord,
    ZstdPerFrame,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
/// Standard zstd frame magic, little-endian byte order as stored.
const ZSTD_FRAME_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];
/// Skippable frames use magics 0x184D2A50..=0x184D2A5F.
const ZSTD_SKIPPABLE_PREFIX: [u8; 3] = [0x2a, 0x4d, 0x18];

impl CodecKind {
    pub fn name(self) -> &'static str {
        match self {
            CodecKind::Plain         => "plain",
            CodecKind::GzipPerRecord => "gzip",
            CodecKind::ZstdPerFrame  => "zstd",
        }
    }

    /// Decide the codec from the filename extension, falling back to the
    /// leading magic bytes.
    pub fn sniff(path: &Path, head: &[u8]) -> CodecKind {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") | Some("tgz") => return CodecKind::GzipPerRecord,
            Some("zst") | Some("zstd") => return CodecKind::ZstdPerFrame,
            _ => {}
        }
        if head.starts_with(&GZIP_MAGIC) {
            return CodecKind::GzipPerRecord;
        }
        if head.len() >= 4
            && (head[..4] == ZSTD_FRAME_MAGIC
                || (head[1..4] == ZSTD_SKIPPABLE_PREFIX && head[0] & 0xf0 == 0x50))
        {
            return CodecKind::ZstdPerFrame;
        }
        CodecKind::Plain
    }
}

// ── Stream contract ──────────────────────────────────────────────────────────

/// One open archive file, viewed as a sequence of offset-tracked units.
///
/// `fill_unit_buf`/`consume_unit` expose the current unit's decoded bytes
/// with `BufRead` semantics so line-oriented parsing above never buffers
/// past what the unit accounted for.
pub trait RecordStream {
    fn kind(&self) -> CodecKind;

    /// Advance to the next unit. Returns its start offset in the physical
    /// file, or `None` at end of file. Any unread remainder of the current
    /// unit is drained first.
    fn next_unit(&mut self) -> io::Result<Option<u64>>;

    /// Decoded bytes of the current unit; empty slice at unit end.
    fn fill_unit_buf(&mut self) -> io::Result<&[u8]>;

    fn consume_unit(&mut self, amt: usize);

    /// Drain the rest of the current unit and return the offset just past
    /// its last physical byte. No-op when already at unit end.
    fn finish_unit(&mut self) -> io::Result<u64>;

    /// Current physical cursor position.
    fn position(&self) -> u64;

    /// Abandon the current unit and position the cursor at the next
    /// plausible unit start at or after `offset`. Returns `false` when the
    /// scan reached end of file.
    fn resync_from(&mut self, offset: u64) -> io::Result<bool>;

    fn read_unit(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let avail = self.fill_unit_buf()?;
        let n = avail.len().min(out.len());
        out[..n].copy_from_slice(&avail[..n]);
        self.consume_unit(n);
        Ok(n)
    }
}

/// Read one `\n`-terminated line from the current unit into `out`.
/// Returns the number of bytes read (0 at unit end). Lines longer than
/// `max` abort with `HeaderFormat` to bound memory on corrupt input.
pub fn read_unit_line(
    stream: &mut dyn RecordStream,
    out: &mut Vec<u8>,
    max: usize,
) -> Result<usize, CdxError> {
    out.clear();
    loop {
        let avail = stream.fill_unit_buf()?;
        if avail.is_empty() {
            break;
        }
        match avail.iter().position(|&b| b == b'\n') {
            Some(i) => {
                out.extend_from_slice(&avail[..=i]);
                stream.consume_unit(i + 1);
                break;
            }
            None => {
                out.extend_from_slice(avail);
                let n = avail.len();
                stream.consume_unit(n);
            }
        }
        if out.len() > max {
            return Err(CdxError::HeaderFormat(format!(
                "header line exceeds {max} bytes"
            )));
        }
    }
    Ok(out.len())
}

// ── Opening ──────────────────────────────────────────────────────────────────

/// Open an archive file, sniff its codec, and return the matching stream.
pub fn open_stream(path: &Path) -> Result<Box<dyn RecordStream>, CdxError> {
    let mut file = File::open(path)?;
    let mut head = [0u8; 4];
    let mut got = 0;
    while got < head.len() {
        let n = file.read(&mut head[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    file.seek(io::SeekFrom::Start(0))?;

    let kind = CodecKind::sniff(path, &head[..got]);
    log::debug!("opened {} as {}", path.display(), kind.name());
    let raw = OffsetReader::new(file);
    Ok(match kind {
        CodecKind::Plain         => Box::new(PlainStream::new(raw)),
        CodecKind::GzipPerRecord => Box::new(GzipStream::new(raw)),
        CodecKind::ZstdPerFrame  => Box::new(ZstdStream::open(raw)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn sniff_by_extension() {
        let k = CodecKind::sniff(&PathBuf::from("a.warc.gz"), b"");
        assert_eq!(k, CodecKind::GzipPerRecord);
        let k = CodecKind::sniff(&PathBuf::from("a.warc.zst"), b"");
        assert_eq!(k, CodecKind::ZstdPerFrame);
    }

    #[test]
    fn sniff_by_magic() {
        let k = CodecKind::sniff(&PathBuf::from("a.warc"), &[0x1f, 0x8b, 0x08, 0x00]);
        assert_eq!(k, CodecKind::GzipPerRecord);
        let k = CodecKind::sniff(&PathBuf::from("a.warc"), &[0x28, 0xb5, 0x2f, 0xfd]);
        assert_eq!(k, CodecKind::ZstdPerFrame);
        // Leading skippable frame also marks a zstd file.
        let k = CodecKind::sniff(&PathBuf::from("a.warc"), &[0x5d, 0x2a, 0x4d, 0x18]);
        assert_eq!(k, CodecKind::ZstdPerFrame);
        let k = CodecKind::sniff(&PathBuf::from("a.warc"), b"WARC");
        assert_eq!(k, CodecKind::Plain);
    }
}
