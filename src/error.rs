use std::io;
use thiserror::Error;

// ── Error taxonomy ───────────────────────────────────────────────────────────
//
// Three classes matter to the driving loop:
//   - container decode failures are resynchronizable: seek back to the unit
//     start and scan forward for the next plausible unit;
//   - header/field failures are fatal for one record only;
//   - genuine I/O failures always abort the run.

#[derive(Error, Debug)]
pub enum CdxError {
    /// The physical framing could not be decoded (bad magic, checksum
    /// mismatch, malformed compressed stream). Recoverable by seeking back
    /// to `offset` and scanning forward.
    #[error("container decode error at offset {offset}: {reason}")]
    ContainerDecode { offset: u64, reason: String },

    /// A record header block that none of the known layouts accept.
    #[error("record header error: {0}")]
    HeaderFormat(String),

    /// A requested field could not be computed and is not safely nullable.
    #[error("field value error: {0}")]
    FieldValue(String),

    /// Structural problem inside an embedded HTTP message.
    #[error("http parse error: {0}")]
    Http(String),

    /// Contract violation inside this crate (e.g. digest taken before the
    /// source was drained). Never tolerated by any policy.
    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How the driving loop recovers from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Seek back and scan for the next unit.
    Resync,
    /// Drop the record, advance to the next unit without seeking.
    SkipRecord,
    /// Not recoverable.
    Fatal,
}

impl CdxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CdxError::ContainerDecode { .. } => ErrorClass::Resync,
            CdxError::HeaderFormat(_)
            | CdxError::FieldValue(_)
            | CdxError::Http(_) => ErrorClass::SkipRecord,
            CdxError::Io(e) if is_decode_error(e) => ErrorClass::Resync,
            CdxError::Internal(_) | CdxError::Io(_) => ErrorClass::Fatal,
        }
    }

    /// Stable per-class key used to rate-limit error reporting.
    pub fn key(&self) -> &'static str {
        match self {
            CdxError::ContainerDecode { .. } => "container-decode",
            CdxError::HeaderFormat(_)        => "header-format",
            CdxError::FieldValue(_)          => "field-value",
            CdxError::Http(_)                => "http-parse",
            CdxError::Internal(_)            => "internal",
            CdxError::Io(_)                  => "io",
        }
    }

    /// Known-benign classes tolerated by the default (`common`) policy.
    pub fn is_benign(&self) -> bool {
        match self {
            CdxError::ContainerDecode { .. }
            | CdxError::HeaderFormat(_)
            | CdxError::FieldValue(_)
            | CdxError::Http(_) => true,
            CdxError::Io(e) => is_decode_error(e),
            CdxError::Internal(_) => false,
        }
    }

    /// Upgrade an I/O error that came out of a decoder into the
    /// resynchronizable class, tagged with the failing unit's offset.
    pub fn into_decode_at(self, offset: u64) -> Self {
        match self {
            CdxError::Io(e) if is_decode_error(&e) => CdxError::ContainerDecode {
                offset,
                reason: e.to_string(),
            },
            other => other,
        }
    }
}

/// Decoder failures surface as `io::Error` from flate2 and zstd. Both report
/// corrupt input as `InvalidData`/`InvalidInput` (zstd also uses `Other`);
/// truncated members surface as `UnexpectedEof`.
pub fn is_decode_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Other
    )
}
