//! Streaming SHA-1 digest over a byte source.
//!
//! The digest is only meaningful once the wrapped source reported
//! end-of-data; asking earlier is a caller bug, not an input problem.

use std::io::{self, Read};

use data_encoding::BASE32;
use sha1::{Digest, Sha1};

use crate::error::CdxError;

pub struct DigestingReader<R: Read> {
    inner:    R,
    hasher:   Sha1,
    complete: bool,
    count:    u64,
}

impl<R: Read> DigestingReader<R> {
    pub fn new(inner: R) -> Self {
        DigestingReader {
            inner,
            hasher: Sha1::new(),
            complete: false,
            count: 0,
        }
    }

    /// True once the wrapped source has signalled end-of-data.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bytes digested so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Read the source to exhaustion, discarding the bytes.
    pub fn drain(&mut self) -> io::Result<u64> {
        let mut scratch = [0u8; 8192];
        loop {
            match self.read(&mut scratch) {
                Ok(0) => return Ok(self.count),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Base32 rendering of the final SHA-1. Valid only after the source is
    /// fully drained.
    pub fn digest_base32(self) -> Result<String, CdxError> {
        if !self.complete {
            return Err(CdxError::Internal(
                "digest requested before the content block was drained".into(),
            ));
        }
        Ok(BASE32.encode(&self.hasher.finalize()))
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.complete = true;
        } else {
            self.hasher.update(&buf[..n]);
            self.count += n as u64;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_source_digest() {
        let mut r = DigestingReader::new(Cursor::new(Vec::new()));
        r.drain().unwrap();
        // SHA-1 of the empty string, base32.
        assert_eq!(r.digest_base32().unwrap(), "3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ");
    }

    #[test]
    fn digest_before_drain_is_an_error() {
        let mut r = DigestingReader::new(Cursor::new(b"abc".to_vec()));
        let mut one = [0u8; 1];
        r.read(&mut one).unwrap();
        assert!(!r.is_complete());
        assert!(r.digest_base32().is_err());
    }

    #[test]
    fn drain_counts_bytes() {
        let mut r = DigestingReader::new(Cursor::new(vec![0u8; 10_000]));
        assert_eq!(r.drain().unwrap(), 10_000);
        assert!(r.is_complete());
    }
}
