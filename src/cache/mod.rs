//! Tag-based cache invalidation contract
//!
//! The read-through response cache lives outside this crate. Write paths
//! call [`CacheInvalidator::invalidate`] with a tag; exports never read from
//! or write to the cache.

use std::fmt;
use std::sync::Mutex;

use tracing::debug;

/// Invalidation tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTag {
    /// Every cached list/page response
    Lists,
    /// Every cached single-entity response
    Single,
}

impl CacheTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTag::Lists => "lists",
            CacheTag::Single => "single",
        }
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborator that drops every cache entry carrying a tag
pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, tag: CacheTag);
}

/// Invalidator for deployments without a response cache
#[derive(Debug, Default)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, tag: CacheTag) {
        debug!(tag = %tag, "Cache invalidation requested, no cache configured");
    }
}

/// Invalidator that remembers every tag it was asked to clear
#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    tags: Mutex<Vec<CacheTag>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags received so far, oldest first
    pub fn tags(&self) -> Vec<CacheTag> {
        match self.tags.lock() {
            Ok(tags) => tags.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl CacheInvalidator for RecordingInvalidator {
    fn invalidate(&self, tag: CacheTag) {
        match self.tags.lock() {
            Ok(mut tags) => tags.push(tag),
            Err(poisoned) => poisoned.into_inner().push(tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(CacheTag::Lists.to_string(), "lists");
        assert_eq!(CacheTag::Single.as_str(), "single");
    }

    #[test]
    fn test_recording_invalidator_keeps_order() {
        let recorder = RecordingInvalidator::new();
        recorder.invalidate(CacheTag::Single);
        recorder.invalidate(CacheTag::Lists);
        assert_eq!(recorder.tags(), vec![CacheTag::Single, CacheTag::Lists]);
    }
}
