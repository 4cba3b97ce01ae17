// src/dedup.rs
//! Exact-duplicate filter over content fingerprints.
//!
//! Unlike a time-windowed text dedup, a fingerprint is remembered for the
//! whole replay: the second article with an equal normalized title is
//! never scored.
//!
//! Each fingerprint remembers the article that claimed it. Claiming again
//! with the same article id answers "new" again, so a write that is
//! repeated after a lost reply cannot turn an article into its own
//! duplicate.

use std::collections::HashMap;

use crate::article::ContentFingerprint;

#[derive(Debug, Default)]
pub struct Deduplicator {
    owners: HashMap<ContentFingerprint, String>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, fp: &ContentFingerprint) -> bool {
        self.owners.contains_key(fp)
    }

    /// Claim `fp` for `owner`. Returns `true` if the fingerprint was free
    /// or is already owned by `owner`.
    pub fn record(&mut self, fp: ContentFingerprint, owner: &str) -> bool {
        self.owners.entry(fp).or_insert_with(|| owner.to_string()) == owner
    }

    pub fn owner(&self, fp: &ContentFingerprint) -> Option<&str> {
        self.owners.get(fp).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn clear(&mut self) {
        self.owners.clear();
    }
}
