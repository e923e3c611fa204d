//! Record dispatch: which handler, if any, indexes a record.
//!
//! The decision is a pure function of the record type plus a few per-record
//! content signals (HTTP status, content type, URL scheme, profile header).
//! It is recomputed for every record: the signals vary between records of
//! the same type, so caching keyed by type alone would suppress or include
//! the wrong records.

use std::sync::LazyLock;

use regex::Regex;

use crate::record::{LogicalRecord, RecordType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Index HTTP captures only.
    Default,
    /// Index every record in the file.
    AllRecords,
    /// Wayback screenshot collections: image metadata records become
    /// screenshot captures.
    Screenshot,
    /// Video metadata collections.
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Generic,
    Warcinfo,
    Response,
    Revisit,
    Resource,
    Ftp,
    Screenshot,
    VideoMeta,
}

static RE_NOT_MODIFIED_PROFILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/revisit/server-not-modified$").unwrap());

fn is_loopback(addr: &str) -> bool {
    let addr = addr.trim();
    addr.starts_with("127.") || addr == "::1" || addr == "localhost"
}

fn content_type_is(record: &LogicalRecord, expected: &str) -> bool {
    record
        .content_type
        .as_deref()
        .map(|ct| ct.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// Select a handler for a record, or `None` to skip it.
///
/// `http_status` carries the embedded HTTP status when the payload was
/// classified as an HTTP message; it is the content signal behind the
/// 304-suppression rule.
pub fn dispatch(
    mode: DispatchMode,
    record: &LogicalRecord,
    http_status: Option<u16>,
) -> Option<HandlerKind> {
    // Self-captures from the crawler's own proxy are never indexed.
    if record.ip_address.as_deref().is_some_and(is_loopback) {
        return None;
    }

    let all = mode == DispatchMode::AllRecords;

    match &record.record_type {
        RecordType::Response => {
            if content_type_is(record, "text/dns") {
                return None;
            }
            if !all && http_status == Some(304) {
                return None;
            }
            Some(HandlerKind::Response)
        }
        RecordType::Revisit => {
            let not_modified = record
                .header("WARC-Profile")
                .is_some_and(|p| RE_NOT_MODIFIED_PROFILE.is_match(p));
            if !all && not_modified {
                return None;
            }
            Some(HandlerKind::Revisit)
        }
        RecordType::Resource => {
            let url = record.url.as_deref().unwrap_or("");
            if url.starts_with("ftp://") {
                Some(HandlerKind::Ftp)
            } else if url.starts_with("http://") || url.starts_with("https://") {
                Some(HandlerKind::Resource)
            } else if all {
                Some(HandlerKind::Generic)
            } else {
                None
            }
        }
        RecordType::Metadata => {
            match mode {
                DispatchMode::Screenshot => {
                    let ct = record.content_type.as_deref().unwrap_or("");
                    if ct.starts_with("image/") {
                        return Some(HandlerKind::Screenshot);
                    }
                    None
                }
                DispatchMode::Video => {
                    let ct = record.content_type.as_deref().unwrap_or("");
                    if ct.starts_with("application/json;generator-youtube-dl") {
                        return Some(HandlerKind::VideoMeta);
                    }
                    None
                }
                DispatchMode::AllRecords => Some(HandlerKind::Generic),
                DispatchMode::Default => None,
            }
        }
        RecordType::Warcinfo => all.then_some(HandlerKind::Warcinfo),
        RecordType::Filedesc | RecordType::Request | RecordType::Other(_) => {
            all.then_some(HandlerKind::Generic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::HeaderMap;
    use crate::record::{Body, Family};
    use std::io::Cursor;

    fn record(rt: RecordType) -> LogicalRecord<'static> {
        LogicalRecord {
            record_type:    rt,
            family:         Family::Warc,
            headers:        HeaderMap::new(),
            start_offset:   0,
            url:            Some("http://example.com/".into()),
            date:           None,
            content_length: Some(0),
            content_type:   None,
            ip_address:     None,
            body:           Body::Buffered(Cursor::new(Vec::new())),
        }
    }

    #[test]
    fn http_304_suppressed_only_by_default() {
        let rec = record(RecordType::Response);
        assert_eq!(dispatch(DispatchMode::Default, &rec, Some(304)), None);
        assert_eq!(
            dispatch(DispatchMode::AllRecords, &rec, Some(304)),
            Some(HandlerKind::Response)
        );
        assert_eq!(
            dispatch(DispatchMode::Default, &rec, Some(200)),
            Some(HandlerKind::Response)
        );
    }

    #[test]
    fn dns_records_never_indexed() {
        let mut rec = record(RecordType::Response);
        rec.content_type = Some("text/dns".into());
        assert_eq!(dispatch(DispatchMode::Default, &rec, None), None);
        assert_eq!(dispatch(DispatchMode::AllRecords, &rec, None), None);
    }

    #[test]
    fn server_not_modified_revisit_suppressed() {
        let mut rec = record(RecordType::Revisit);
        rec.headers.append(
            "WARC-Profile",
            "http://netpreserve.org/warc/1.0/revisit/server-not-modified",
        );
        assert_eq!(dispatch(DispatchMode::Default, &rec, None), None);
        assert_eq!(
            dispatch(DispatchMode::AllRecords, &rec, None),
            Some(HandlerKind::Revisit)
        );
    }

    #[test]
    fn resource_routing_by_scheme() {
        let mut rec = record(RecordType::Resource);
        rec.url = Some("ftp://ftp.example.org/a.txt".into());
        assert_eq!(
            dispatch(DispatchMode::Default, &rec, None),
            Some(HandlerKind::Ftp)
        );
        rec.url = Some("https://example.org/a".into());
        assert_eq!(
            dispatch(DispatchMode::Default, &rec, None),
            Some(HandlerKind::Resource)
        );
        // wget writes its own log as a metadata-ish resource record.
        rec.url = Some("metadata://gnu.org/software/wget/warc/wget.log".into());
        assert_eq!(dispatch(DispatchMode::Default, &rec, None), None);
        assert_eq!(
            dispatch(DispatchMode::AllRecords, &rec, None),
            Some(HandlerKind::Generic)
        );
    }

    #[test]
    fn loopback_captures_dropped() {
        let mut rec = record(RecordType::Response);
        rec.ip_address = Some("127.0.0.1".into());
        assert_eq!(dispatch(DispatchMode::AllRecords, &rec, Some(200)), None);
    }

    #[test]
    fn warcinfo_only_in_all_mode() {
        let rec = record(RecordType::Warcinfo);
        assert_eq!(dispatch(DispatchMode::Default, &rec, None), None);
        assert_eq!(
            dispatch(DispatchMode::AllRecords, &rec, None),
            Some(HandlerKind::Warcinfo)
        );
    }

    #[test]
    fn screenshot_mode_metadata_images() {
        let mut rec = record(RecordType::Metadata);
        rec.content_type = Some("image/png".into());
        assert_eq!(
            dispatch(DispatchMode::Screenshot, &rec, None),
            Some(HandlerKind::Screenshot)
        );
        assert_eq!(dispatch(DispatchMode::Default, &rec, None), None);
    }
}
