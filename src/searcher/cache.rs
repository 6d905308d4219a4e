//! Optional TTL'd LRU cache for search responses.
//!
//! Keys are a stable hash over the full request (query, mode, project,
//! limit, fusion constant, filters), so two projects or two filter sets can
//! never share an entry. Expired entries are treated as misses and evicted
//! on touch.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::SearchResponse;

const CACHE_CAPACITY: usize = 128;
const CACHE_TTL: Duration = Duration::from_secs(60);

struct CachedEntry {
    stored_at: Instant,
    response: SearchResponse,
}

pub(crate) struct ResultCache {
    entries: Mutex<LruCache<u64, CachedEntry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::with_ttl(CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            ttl,
        }
    }

    /// Fetch a live entry, evicting it if expired. A poisoned lock is
    /// treated as a miss; the cache is purely an optimization.
    pub fn get(&self, key: u64) -> Option<SearchResponse> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(&key) {
            None => return None,
            Some(entry) => {
                if entry.stored_at.elapsed() <= self.ttl {
                    return Some(entry.response.clone());
                }
            }
        }
        entries.pop(&key);
        None
    }

    pub fn put(&self, key: u64, response: SearchResponse) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(
                key,
                CachedEntry {
                    stored_at: Instant::now(),
                    response,
                },
            );
        }
    }

    /// Drop everything. Callers that index and search in one process call
    /// this after an indexing run.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }
}
