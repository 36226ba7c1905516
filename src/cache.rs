//! Cross-request tagging cache.
//!
//! When the resolver lazily tags a never-before-seen fragment, the result is
//! cached keyed by (trimmed source text, scope id) so later requests for the
//! same not-yet-persisted fragment skip the allocation work. Invalidation is
//! explicit: the translation store calls `invalidate(hash)` synchronously
//! after every successful write, so a human edit is visible on the next
//! render rather than after some TTL.

use std::collections::HashMap;
use std::sync::Mutex;

/// A previously computed lazy-tagging result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTagging {
    /// The fragment with its marker embedded
    pub tagged_text: String,
    /// The hash the marker carries
    pub hash: String,
}

/// Cache of lazy-tagging results, with explicit per-hash invalidation.
pub trait TaggingCache: Send + Sync {
    fn get(&self, source_text: &str, scope_id: Option<i64>) -> Option<CachedTagging>;

    fn put(&self, source_text: &str, scope_id: Option<i64>, tagged_text: &str, hash: &str);

    /// Drop every entry carrying this hash. Called by the translation store
    /// after each successful write.
    fn invalidate(&self, hash: &str);
}

/// Process-wide in-memory cache.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<(String, Option<i64>), CachedTagging>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached entries (test observability).
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaggingCache for InMemoryCache {
    fn get(&self, source_text: &str, scope_id: Option<i64>) -> Option<CachedTagging> {
        self.entries
            .lock()
            .unwrap()
            .get(&(source_text.trim().to_string(), scope_id))
            .cloned()
    }

    fn put(&self, source_text: &str, scope_id: Option<i64>, tagged_text: &str, hash: &str) {
        self.entries.lock().unwrap().insert(
            (source_text.trim().to_string(), scope_id),
            CachedTagging {
                tagged_text: tagged_text.to_string(),
                hash: hash.to_string(),
            },
        );
    }

    fn invalidate(&self, hash: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, cached| cached.hash != hash);
    }
}

/// Cache that stores nothing; useful for batch jobs and tests.
pub struct NoopCache;

impl TaggingCache for NoopCache {
    fn get(&self, _source_text: &str, _scope_id: Option<i64>) -> Option<CachedTagging> {
        None
    }

    fn put(&self, _source_text: &str, _scope_id: Option<i64>, _tagged_text: &str, _hash: &str) {}

    fn invalidate(&self, _hash: &str) {}
}
