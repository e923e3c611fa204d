//! HTML `<meta>` extraction for the AIF flags field.
//!
//! Only tags before `</head>` count, wherever they sit in the tree.
//! Duplicate names are comma-joined, except `refresh` where the first tag
//! wins (it names the redirect target).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

static RE_META_OR_HEAD_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)(<meta[^>]*?>|</head>)").unwrap());

static RE_NAME_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\b(?:name|http-equiv)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s'">]+))"#).unwrap()
});

static RE_CONTENT_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)\bcontent\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s'">]+))"#).unwrap()
});

#[derive(Debug, Default)]
pub struct MetaTags {
    tags: HashMap<String, String>,
}

impl MetaTags {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

fn attr_value(tag: &str, re: &Regex) -> Option<String> {
    let caps = re.captures(tag)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_owned())
}

/// Scan decoded head content for meta tags.
pub fn parse_meta_tags(html: &str) -> MetaTags {
    let mut out = MetaTags::default();
    let html = html.trim();
    if html.is_empty() {
        return out;
    }

    for m in RE_META_OR_HEAD_END.find_iter(html) {
        let tag = m.as_str();
        if tag.eq_ignore_ascii_case("</head>") {
            break;
        }
        let Some(name) = attr_value(tag, &RE_NAME_ATTR) else {
            continue;
        };
        let name = name.to_ascii_lowercase();
        let Some(content) = attr_value(tag, &RE_CONTENT_ATTR) else {
            continue;
        };
        match out.tags.get_mut(&name) {
            None => {
                out.tags.insert(name, content);
            }
            Some(existing) => {
                if name != "refresh" {
                    existing.push(',');
                    existing.push_str(&content);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robots_tag_before_head_end() {
        let html = r#"<html><head><meta name="robots" content="noindex,nofollow"></head>
            <body><meta name="robots" content="noarchive"></body></html>"#;
        let tags = parse_meta_tags(html);
        assert_eq!(tags.get("robots"), Some("noindex,nofollow"));
    }

    #[test]
    fn nested_meta_still_counts() {
        let html = r#"<head><noscript><meta name="ROBOTS" content="noarchive"/></noscript></head>"#;
        let tags = parse_meta_tags(html);
        assert_eq!(tags.get("robots"), Some("noarchive"));
    }

    #[test]
    fn duplicates_comma_joined_except_refresh() {
        let html = r#"<head>
            <meta name="keywords" content="a">
            <meta name="keywords" content="b">
            <meta http-equiv="refresh" content="0;url=/first">
            <meta http-equiv="refresh" content="0;url=/second">
            </head>"#;
        let tags = parse_meta_tags(html);
        assert_eq!(tags.get("keywords"), Some("a,b"));
        assert_eq!(tags.get("refresh"), Some("0;url=/first"));
    }

    #[test]
    fn unquoted_and_single_quoted_attributes() {
        let html = "<head><meta name=robots content='noindex'></head>";
        let tags = parse_meta_tags(html);
        assert_eq!(tags.get("robots"), Some("noindex"));
    }

    #[test]
    fn blank_document() {
        assert!(parse_meta_tags("   ").is_empty());
    }
}
