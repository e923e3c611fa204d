//! Exclusion lists: canonicalized URL prefixes that must not be indexed.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::canon::UrlKey;
use crate::error::CdxError;

pub trait Exclusion {
    fn excluded(&self, urlkey: &str) -> bool;
}

/// Prefix membership over a list loaded from a file: one URL per line,
/// first whitespace-separated token, canonicalized with the same
/// canonicalizer the indexer uses.
pub struct PrefixExclusion {
    prefixes: Vec<String>,
}

impl PrefixExclusion {
    pub fn from_file(path: &Path, canon: &dyn UrlKey) -> Result<Self, CdxError> {
        let reader = BufReader::new(File::open(path)?);
        let mut prefixes = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let Some(url) = line.split_whitespace().next() else {
                continue;
            };
            let key = canon
                .canonicalize(url)
                .unwrap_or_else(|_| url.to_owned());
            prefixes.push(key);
        }
        Ok(PrefixExclusion { prefixes })
    }

    pub fn from_prefixes(prefixes: Vec<String>) -> Self {
        PrefixExclusion { prefixes }
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}

impl Exclusion for PrefixExclusion {
    fn excluded(&self, urlkey: &str) -> bool {
        self.prefixes.iter().any(|p| urlkey.starts_with(p.as_str()))
    }
}
