//! LRU of consumed payment authorizations.
//!
//! This is the fast path of replay protection: it rejects an obviously
//! resubmitted payload before the facilitator is called. The ledger's
//! unique `authorization_id` column is the durable guarantee.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default capacity.
const DEFAULT_CAPACITY: usize = 100_000;

/// Recently consumed authorization ids.
#[derive(Clone)]
pub struct ConsumedAuthorizations {
    inner: Arc<Mutex<LruCache<String, ()>>>,
    stats: Arc<Mutex<ReplayStats>>,
}

/// Replay cache statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Lookups that found a consumed id.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Ids recorded.
    pub additions: u64,
}

impl ConsumedAuthorizations {
    /// Create a cache with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a cache holding at most `capacity` ids (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(ReplayStats::default())),
        }
    }

    /// Whether `authorization_id` was already consumed.
    pub fn contains(&self, authorization_id: &str) -> bool {
        let found = self.inner.lock().get(authorization_id).is_some();

        let mut stats = self.stats.lock();
        if found {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        found
    }

    /// Record a consumed id. Call only after the credit committed.
    pub fn insert(&self, authorization_id: String) {
        self.inner.lock().put(authorization_id, ());
        self.stats.lock().additions += 1;
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> ReplayStats {
        self.stats.lock().clone()
    }

    /// Number of cached ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for ConsumedAuthorizations {
    fn default() -> Self {
        Self::new()
    }
}
