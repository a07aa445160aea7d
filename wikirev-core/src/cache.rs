//! Current-revision cache
//!
//! Maps a page key to the page's current revision. The cache is positive
//! only: a missing entry means "unknown" and callers fall back to the store.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::model::Revision;

/// Process-wide page cache. Swappable for a distributed implementation.
pub trait PageCache: Send + Sync {
    fn try_get(&self, page_key: &str) -> Option<Revision>;

    /// Store `revision` under its own page key
    fn set(&self, revision: Revision);

    fn evict(&self, page_key: &str);
}

/// Bounded in-process cache with least-recently-used eviction
pub struct LruPageCache {
    entries: Mutex<LruCache<String, Revision>>,
}

impl LruPageCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, LruCache<String, Revision>> {
        // LruCache has no partial state after a panic
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl PageCache for LruPageCache {
    fn try_get(&self, page_key: &str) -> Option<Revision> {
        self.entries().get(page_key).cloned()
    }

    fn set(&self, revision: Revision) {
        self.entries().put(revision.page_key(), revision);
    }

    fn evict(&self, page_key: &str) {
        self.entries().pop(page_key);
    }
}
