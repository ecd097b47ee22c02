//! The set of URIs ever admitted to the job queue.
//!
//! Every URI that becomes a job passes through [`Blacklist::admit`] exactly
//! once. Comparison uses the normalized absolute form with the fragment
//! stripped; the `url` crate already lower-cases scheme and host on parse.

use std::collections::HashSet;

use url::Url;

/// Deduplicates URIs across the whole run.
#[derive(Debug, Default)]
pub struct Blacklist {
    seen: HashSet<String>,
}

impl Blacklist {
    /// Create an empty blacklist.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a URI, returning it (fragment stripped) if never seen before.
    ///
    /// `None` means duplicate: the caller must not enqueue.
    pub fn admit(&mut self, mut uri: Url) -> Option<Url> {
        uri.set_fragment(None);
        if self.seen.insert(uri.to_string()) {
            Some(uri)
        } else {
            None
        }
    }

    /// Number of URIs admitted so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether nothing has been admitted yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Iterate the admitted URIs (for the `--debug` dump).
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }
}
