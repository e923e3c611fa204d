//! URL canonicalization is an external capability: the indexer only ever
//! calls through this trait and falls back to the original URL when the
//! canonicalizer fails.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("canonicalizer failed: {0}")]
pub struct CanonError(pub String);

pub trait UrlKey {
    fn canonicalize(&self, url: &str) -> Result<String, CanonError>;
}

impl<F> UrlKey for F
where
    F: Fn(&str) -> Result<String, CanonError>,
{
    fn canonicalize(&self, url: &str) -> Result<String, CanonError> {
        self(url)
    }
}

/// Pass-through canonicalizer used when no external one is injected.
pub struct IdentityCanonicalizer;

impl UrlKey for IdentityCanonicalizer {
    fn canonicalize(&self, url: &str) -> Result<String, CanonError> {
        Ok(url.to_owned())
    }
}
