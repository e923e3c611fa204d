//! Handler construction: consume a dispatched record's content block and
//! capture everything the field extractor needs.
//!
//! The payload stream is read exactly once. HTTP-shaped blocks digest the
//! decoded message body (payload digest); everything else digests the block
//! verbatim. HTML bodies under the size cap are teed into memory for the
//! meta-tag scan.

use std::io::Read;

use crate::digest::DigestingReader;
use crate::dispatch::HandlerKind;
use crate::error::CdxError;
use crate::fields::normalize_mime;
use crate::http::HttpMessage;
use crate::meta::{self, MetaTags};
use crate::record::{Family, LogicalRecord, RecordType};

/// Content signals surfaced from an embedded HTTP message.
pub struct HttpInfo {
    pub status:       u16,
    pub version:      u8,
    pub content_type: Option<String>,
    pub location:     Option<String>,
    pub x_robots_tag: Option<String>,
}

/// Everything the field extractor reads. Owns no streams: the record was
/// fully consumed when this was built.
pub struct HandlerData {
    pub kind:                    HandlerKind,
    pub record_type:             RecordType,
    pub family:                  Family,
    pub url:                     Option<String>,
    pub date_raw:                Option<String>,
    pub record_content_type:     Option<String>,
    pub http:                    Option<HttpInfo>,
    pub declared_payload_digest: Option<String>,
    pub declared_block_digest:   Option<String>,
    pub computed_digest:         Option<String>,
    pub meta:                    Option<MetaTags>,
    /// Crawler login-attempt header; a positive leading counter marks a
    /// password-protected capture.
    pub login_attempts:          Option<String>,
}

/// Consume the record (and its parsed HTTP message, when one was
/// classified) into a `HandlerData`.
pub fn build(
    kind: HandlerKind,
    record: &mut LogicalRecord<'_>,
    http_msg: Option<HttpMessage<'_>>,
    html_meta_cap: u64,
) -> Result<HandlerData, CdxError> {
    let declared_payload_digest = record.declared_digest("WARC-Payload-Digest");
    let declared_block_digest = record.declared_digest("WARC-Block-Digest");
    let login_attempts = record
        .header("WARC-Simple-Form-Province-Status")
        .map(str::to_owned);

    let mut http = None;
    let mut computed_digest = None;
    let mut meta_tags = None;

    match http_msg {
        Some(mut msg) => {
            let mime = normalize_mime(msg.content_type());
            let under_cap = record
                .content_length
                .is_some_and(|l| l >= 0 && (l as u64) <= html_meta_cap);
            let want_html = mime == "text/html" && under_cap;

            let mut digester = DigestingReader::new(msg.body_mut());
            let mut html_buf = want_html.then(Vec::new);
            let mut chunk = [0u8; 8192];
            loop {
                let n = digester.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                if let Some(buf) = html_buf.as_mut() {
                    buf.extend_from_slice(&chunk[..n]);
                }
            }
            computed_digest = Some(digester.digest_base32()?);
            if let Some(buf) = html_buf {
                meta_tags = Some(meta::parse_meta_tags(&String::from_utf8_lossy(&buf)));
            }

            // Identity bodies shorter than the block leave record bytes
            // behind; consume them so offsets stay exact.
            msg.drain_rest()?;

            http = Some(HttpInfo {
                status:       msg.status,
                version:      msg.version,
                content_type: msg.content_type().map(str::to_owned),
                location:     msg.header("location").map(str::to_owned),
                x_robots_tag: msg.header("x-robots-tag").map(str::to_owned),
            });
        }
        None => {
            let mut digester = DigestingReader::new(&mut record.body);
            digester.drain()?;
            computed_digest = Some(digester.digest_base32()?);
        }
    }

    Ok(HandlerData {
        kind,
        record_type: record.record_type.clone(),
        family: record.family,
        url: record.url.clone(),
        date_raw: record.date.clone(),
        record_content_type: record.content_type.clone(),
        http,
        declared_payload_digest,
        declared_block_digest,
        computed_digest,
        meta: meta_tags,
        login_attempts,
    })
}
