//! CDX field extraction.
//!
//! Field codes are opaque single letters mapped to accessors here, checked
//! once at startup so an unknown code is a configuration error rather than
//! a per-record surprise. Values are rendered space-joined with `-` for
//! null, which makes the space character unrepresentable inside values; the
//! URL cleaning below percent-encodes it away.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::canon::UrlKey;
use crate::dispatch::HandlerKind;
use crate::error::CdxError;
use crate::handler::HandlerData;
use crate::record::Family;

/// Tag embedded in synthetic warcinfo URLs, mirroring how playback tools
/// identify the index generator.
pub const WARCINFO_BUILD_TAG: &str = "cdxwrite-1.0.0";

// ── Field codes ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCode {
    MassagedUrl,
    Date,
    OriginalUrl,
    MimeType,
    ResponseCode,
    Checksum,
    Redirect,
    MetaTags,
    CompressedSize,
    FileOffset,
    FileName,
}

impl FieldCode {
    pub fn from_code(c: char) -> Option<FieldCode> {
        match c {
            'N' => Some(FieldCode::MassagedUrl),
            'b' => Some(FieldCode::Date),
            'a' => Some(FieldCode::OriginalUrl),
            'm' => Some(FieldCode::MimeType),
            's' => Some(FieldCode::ResponseCode),
            'k' => Some(FieldCode::Checksum),
            'r' => Some(FieldCode::Redirect),
            'M' => Some(FieldCode::MetaTags),
            'S' => Some(FieldCode::CompressedSize),
            'V' => Some(FieldCode::FileOffset),
            'g' => Some(FieldCode::FileName),
            _ => None,
        }
    }

    /// Parse a space-separated field-format string, rejecting unknown
    /// codes up front.
    pub fn parse_format(format: &str) -> Result<Vec<FieldCode>, CdxError> {
        let mut out = Vec::new();
        for token in format.split_whitespace() {
            let mut chars = token.chars();
            let (c, rest) = (chars.next(), chars.next());
            match (c, rest) {
                (Some(c), None) => match FieldCode::from_code(c) {
                    Some(f) => out.push(f),
                    None => {
                        return Err(CdxError::FieldValue(format!("unknown field code: {c}")))
                    }
                },
                _ => {
                    return Err(CdxError::FieldValue(format!(
                        "malformed field code: {token}"
                    )))
                }
            }
        }
        if out.is_empty() {
            return Err(CdxError::FieldValue("empty field format".into()));
        }
        Ok(out)
    }
}

// ── Normalization helpers ────────────────────────────────────────────────────

static RE_HEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-f0-9]+$").unwrap());
static RE_DIGITS_THEN_LETTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{14,18}[a-zA-Z]+$").unwrap());
static RE_MIME_OK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[-a-z0-9.+/]+$").unwrap());

/// Normalize a record date to the 14-digit CDX timestamp.
///
/// ARC dates come in every length between 10 and 18 digits, sometimes with
/// trailing letters, sometimes as a hex string (null, not an error). WARC
/// dates are ISO-8601, truncated to seconds; an unparsable WARC date is a
/// field error rather than silent null.
pub fn normalize_date(raw: Option<&str>) -> Result<Option<String>, CdxError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        match raw.len() {
            14 => return Ok(Some(raw.to_owned())),
            15..=18 => return Ok(Some(raw[..14].to_owned())),
            12 => return Ok(Some(format!("{raw}00"))),
            10 => return Ok(Some(format!("{raw}0000"))),
            // Other digit counts fall through to the strict parse below.
            _ => {}
        }
    } else if RE_HEX.is_match(raw) {
        return Ok(None);
    } else if RE_DIGITS_THEN_LETTERS.is_match(raw) {
        return Ok(Some(raw[..14].to_owned()));
    }

    for fmt in [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Some(dt.format("%Y%m%d%H%M%S").to_string()));
        }
    }
    Err(CdxError::FieldValue(format!("unparsable record date: {raw}")))
}

/// Lower-case, parameter-stripped content type, or `unk` when missing,
/// empty, `no-type`, or containing bytes outside the allowed set.
pub fn normalize_mime(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return "unk".to_owned();
    };
    let ct = raw.trim();
    if ct.is_empty() || ct == "no-type" {
        return "unk".to_owned();
    }
    let ct = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    if RE_MIME_OK.is_match(&ct) {
        ct
    } else {
        "unk".to_owned()
    }
}

/// Clean a record URL for CDX output: strip wrapping angle brackets (a wget
/// artifact), drop carriage returns the way browsers do, and percent-encode
/// the whitespace characters that would break space-separated rows.
pub fn safe_url(raw: &str) -> String {
    let mut url = raw.trim();
    if url.starts_with('<') && url.ends_with('>') && url.len() >= 2 {
        url = &url[1..url.len() - 1];
    }
    let url = url.replace('\r', "");
    let mut out = String::with_capacity(url.len());
    for ch in url.chars() {
        match ch {
            ' ' => out.push_str("%20"),
            '\n' => out.push_str("%0A"),
            '\u{0c}' => out.push_str("%0C"),
            '\u{08}' => out.push_str("%08"),
            c => out.push(c),
        }
    }
    out
}

/// Compact robots/login flag string: `A`/`F`/`I` from robots directives in
/// meta tags and `X-Robots-Tag`, `P` from a positive login-attempt count.
pub fn aif_flags(
    meta_robots: Option<&str>,
    x_robots_tag: Option<&str>,
    login_attempts: Option<&str>,
) -> Option<String> {
    let mut directives: Vec<String> = Vec::new();
    for src in [meta_robots, x_robots_tag].into_iter().flatten() {
        directives.extend(src.split(',').map(|d| d.trim().to_ascii_lowercase()));
    }

    let mut flags = String::new();
    if directives.iter().any(|d| d == "noarchive") {
        flags.push('A');
    }
    if directives.iter().any(|d| d == "nofollow") {
        flags.push('F');
    }
    if directives.iter().any(|d| d == "noindex") {
        flags.push('I');
    }

    if let Some(raw) = login_attempts {
        let count = raw.split(',').next().unwrap_or("").trim();
        if count.parse::<i64>().map(|n| n > 0).unwrap_or(false) {
            flags.push('P');
        }
    }

    (!flags.is_empty()).then_some(flags)
}

// ── Extraction ───────────────────────────────────────────────────────────────

pub struct FieldContext<'a> {
    pub data:       &'a HandlerData,
    /// Value of the `g` (file name) field.
    pub file_name:  &'a str,
    /// Input file path, embedded in synthetic warcinfo URLs.
    pub input_file: &'a str,
    pub canon:      &'a dyn UrlKey,
}

impl FieldContext<'_> {
    pub fn original_url(&self) -> Option<String> {
        let data = self.data;
        match data.kind {
            HandlerKind::Warcinfo => Some(format!(
                "warcinfo:/{}/{}",
                self.input_file, WARCINFO_BUILD_TAG
            )),
            HandlerKind::Screenshot => data
                .url
                .as_deref()
                .map(|u| format!("http://web.archive.org/screenshot/{}", safe_url(u))),
            HandlerKind::VideoMeta => data.url.as_deref().map(|u| {
                format!("http://wayback-metadata.archive.org/video-meta/{}", safe_url(u))
            }),
            _ => data.url.as_deref().map(safe_url),
        }
    }

    /// Canonicalized URL key; falls back to the original URL whenever the
    /// canonicalizer fails.
    pub fn massaged_url(&self) -> Option<String> {
        let data = self.data;
        match data.kind {
            HandlerKind::Warcinfo => self.original_url(),
            HandlerKind::Screenshot => data.url.as_deref().map(|u| {
                let cleaned = safe_url(u);
                let key = self
                    .canon
                    .canonicalize(&cleaned)
                    .unwrap_or_else(|_| cleaned.clone());
                format!("org,archive,web)/screenshot/{key}")
            }),
            HandlerKind::VideoMeta => data.url.as_deref().map(|u| {
                let cleaned = safe_url(u);
                let key = self
                    .canon
                    .canonicalize(&cleaned)
                    .unwrap_or_else(|_| cleaned.clone());
                format!("org,archive,wayback-metadata)/video-meta/{key}")
            }),
            _ => {
                let cleaned = self.data.url.as_deref().map(safe_url)?;
                Some(
                    self.canon
                        .canonicalize(&cleaned)
                        .unwrap_or_else(|_| cleaned.clone()),
                )
            }
        }
    }

    fn mime_type(&self) -> Option<String> {
        let data = self.data;
        let value = match data.kind {
            HandlerKind::Warcinfo => "warc-info".to_owned(),
            HandlerKind::Revisit => "warc/revisit".to_owned(),
            HandlerKind::Generic => format!("warc/{}", data.record_type.name()),
            HandlerKind::VideoMeta | HandlerKind::Screenshot | HandlerKind::Resource
            | HandlerKind::Ftp => normalize_mime(data.record_content_type.as_deref()),
            HandlerKind::Response => match (&data.http, data.family) {
                // WARC responses carry the served type inside the HTTP
                // message; ARC summary lines carry it directly.
                (Some(info), Family::Warc) => normalize_mime(info.content_type.as_deref()),
                _ => normalize_mime(data.record_content_type.as_deref()),
            },
        };
        Some(value)
    }

    fn response_code(&self) -> Option<String> {
        match self.data.kind {
            // FTP captures carry no status; 226 is the class conventionally
            // reported for a completed transfer.
            HandlerKind::Ftp => Some("226".to_owned()),
            HandlerKind::Response => self.data.http.as_ref().map(|i| i.status.to_string()),
            _ => None,
        }
    }

    fn checksum(&self) -> Option<String> {
        let data = self.data;
        match data.kind {
            HandlerKind::Response => data
                .declared_payload_digest
                .clone()
                .or_else(|| data.computed_digest.clone()),
            HandlerKind::Revisit => data.declared_payload_digest.clone(),
            HandlerKind::Resource | HandlerKind::Ftp => data
                .declared_payload_digest
                .clone()
                .or_else(|| data.declared_block_digest.clone())
                .or_else(|| data.computed_digest.clone()),
            _ => data.computed_digest.clone(),
        }
    }

    /// Same-target marker: emitted only when the Location header, resolved
    /// against the record URL and canonicalized, equals the record's own
    /// massaged URL. Redirect destinations are never surfaced.
    fn redirect(&self) -> Option<String> {
        let info = self.data.http.as_ref()?;
        let location = info.location.as_deref()?;
        let base = url::Url::parse(self.data.url.as_deref()?).ok()?;
        let joined = base.join(location.trim()).ok()?;
        let key = self.canon.canonicalize(joined.as_str()).ok()?;
        let own = self.massaged_url()?;
        (key == own).then_some(own)
    }

    fn meta_flags(&self) -> Option<String> {
        if self.data.kind != HandlerKind::Response {
            return None;
        }
        aif_flags(
            self.data.meta.as_ref().and_then(|m| m.get("robots")),
            self.data.http.as_ref().and_then(|i| i.x_robots_tag.as_deref()),
            self.data.login_attempts.as_deref(),
        )
    }

    /// Compute one field. Size and offset are supplied by the driving loop,
    /// which alone knows the unit's physical extent.
    pub fn value(
        &self,
        code: FieldCode,
        start_offset: u64,
        end_offset: u64,
    ) -> Result<Option<String>, CdxError> {
        Ok(match code {
            FieldCode::MassagedUrl => self.massaged_url(),
            FieldCode::Date => normalize_date(self.data.date_raw.as_deref())?,
            FieldCode::OriginalUrl => self.original_url(),
            FieldCode::MimeType => self.mime_type(),
            FieldCode::ResponseCode => self.response_code(),
            FieldCode::Checksum => self.checksum(),
            FieldCode::Redirect => self.redirect(),
            FieldCode::MetaTags => self.meta_flags(),
            FieldCode::CompressedSize => Some((end_offset - start_offset).to_string()),
            FieldCode::FileOffset => Some(start_offset.to_string()),
            FieldCode::FileName => Some(self.file_name.to_owned()),
        })
    }
}

/// Render one row: `-` for null, values space-joined. Any residual space
/// inside a value is percent-encoded to keep the row splittable.
pub fn render_row(values: &[Option<String>]) -> String {
    let rendered: Vec<String> = values
        .iter()
        .map(|v| match v {
            None => "-".to_owned(),
            Some(s) if s.is_empty() => "-".to_owned(),
            Some(s) => s.replace(' ', "%20"),
        })
        .collect();
    rendered.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_digit_length_table() {
        let cases = [
            ("2016020900", Some("20160209000000")),
            ("200011201434", Some("20001120143400")),
            ("20100926112346", Some("20100926112346")),
            ("201512000000000", Some("20151200000000")),
            ("2000082305410049", Some("20000823054100")),
            ("200009180023002953", Some("20000918002300")),
            ("20160211000000jpg", Some("20160211000000")),
        ];
        for (input, expected) in cases {
            assert_eq!(
                normalize_date(Some(input)).unwrap().as_deref(),
                expected,
                "input {input}"
            );
        }
    }

    #[test]
    fn date_hex_string_is_null_not_error() {
        assert_eq!(normalize_date(Some("deadbeef01")).unwrap(), None);
        assert_eq!(normalize_date(None).unwrap(), None);
    }

    #[test]
    fn date_warc_iso8601_variants() {
        let cases = [
            ("2010-09-26T11:23:46Z", "20100926112346"),
            ("2010-09-26T11:23:46", "20100926112346"),
            ("2019-11-18T12:56:03.352903Z", "20191118125603"),
            ("2019-11-18T12:56:03.352903999Z", "20191118125603"),
        ];
        for (input, expected) in cases {
            assert_eq!(
                normalize_date(Some(input)).unwrap().as_deref(),
                Some(expected),
                "input {input}"
            );
        }
    }

    #[test]
    fn date_unparsable_warc_is_field_error() {
        assert!(matches!(
            normalize_date(Some("yesterday at noon")),
            Err(CdxError::FieldValue(_))
        ));
        // A digit string with no table entry gets the strict parse too.
        assert!(normalize_date(Some("2016020")).is_err());
    }

    #[test]
    fn mime_normalization() {
        assert_eq!(normalize_mime(Some("Text/Html; charset=UTF-8")), "text/html");
        assert_eq!(normalize_mime(Some("text/html ; charset=UTF-8")), "text/html");
        assert_eq!(normalize_mime(Some("text/html;")), "text/html");
        assert_eq!(normalize_mime(Some("")), "unk");
        assert_eq!(normalize_mime(Some("no-type")), "unk");
        assert_eq!(normalize_mime(None), "unk");
        assert_eq!(normalize_mime(Some("imag\u{fffd}m)")), "unk");
        assert_eq!(normalize_mime(Some("application/xhtml+xml")), "application/xhtml+xml");
    }

    #[test]
    fn safe_url_cleaning() {
        assert_eq!(safe_url("<http://example.com/>"), "http://example.com/");
        assert_eq!(safe_url("http://e.com/a b"), "http://e.com/a%20b");
        assert_eq!(safe_url("http://e.com/a\rb"), "http://e.com/ab");
        assert_eq!(safe_url("http://e.com/a\nb"), "http://e.com/a%0Ab");
    }

    #[test]
    fn aif_flag_composition() {
        assert_eq!(
            aif_flags(Some("noindex, nofollow"), None, None).as_deref(),
            Some("FI")
        );
        assert_eq!(
            aif_flags(Some("noarchive"), Some("NOINDEX"), None).as_deref(),
            Some("AI")
        );
        assert_eq!(
            aif_flags(None, None, Some("1,1,http://(com,example,)/")).as_deref(),
            Some("P")
        );
        assert_eq!(aif_flags(None, None, Some("0,0,x")), None);
        assert_eq!(aif_flags(None, None, Some("bogus")), None);
        assert_eq!(aif_flags(None, None, None), None);
    }

    #[test]
    fn format_parsing_rejects_unknown_codes() {
        let fields = FieldCode::parse_format("N b a m s k r M S V g").unwrap();
        assert_eq!(fields.len(), 11);
        assert_eq!(fields[0], FieldCode::MassagedUrl);
        assert!(FieldCode::parse_format("N z").is_err());
        assert!(FieldCode::parse_format("Nb").is_err());
        assert!(FieldCode::parse_format("").is_err());
    }

    #[test]
    fn row_rendering() {
        let row = render_row(&[
            Some("a b".to_owned()),
            None,
            Some("ok".to_owned()),
            Some(String::new()),
        ]);
        assert_eq!(row, "a%20b - ok -");
    }
}
