//! Ordered, case-insensitive header map shared by record headers and
//! embedded HTTP headers.
//!
//! Duplicate names are preserved in insertion order; lookup returns the
//! first match. Continuation lines append to the most recent value.

#[derive(Debug, Default, Clone)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        HeaderMap { entries: Vec::new() }
    }

    /// Append a header, keeping any existing entries with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Fold a continuation line into the most recent value.
    pub fn append_continuation(&mut self, more: &str) {
        match self.entries.last_mut() {
            Some((_, value)) => {
                value.push(' ');
                value.push_str(more);
            }
            None => self.entries.push((String::new(), more.to_owned())),
        }
    }

    /// First value for `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
