//! In-process cache tier: a bounded LRU with per-entry TTL.
//!
//! Best-effort only. Consistency is guaranteed by the shared tier and the
//! database; a stale miss here costs one extra lookup, never a wrong answer.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Bounded LRU keyed by string, value byte-slice, with per-entry expiry.
pub struct LocalCache {
    inner: Mutex<LruCache<String, Entry>>,
    default_ttl: Duration,
}

impl LocalCache {
    /// Create a cache bounded to `capacity` elements.
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        LocalCache {
            inner: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let mut cache = self.inner.lock().expect("local cache lock poisoned");
        cache.put(
            key.to_owned(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Expired entries miss and are evicted on the way out.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut cache = self.inner.lock().expect("local cache lock poisoned");
        match cache.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                cache.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&self, key: &str) {
        let mut cache = self.inner.lock().expect("local cache lock poisoned");
        cache.pop(key);
    }

    /// Reset the expiry of an existing entry without touching the value.
    pub fn set_ttl(&self, key: &str, ttl: Duration) {
        let mut cache = self.inner.lock().expect("local cache lock poisoned");
        if let Some(entry) = cache.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("local cache lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let cache = LocalCache::new(8, Duration::from_secs(60));
        cache.set("k", b"v".to_vec(), None);
        assert_eq!(cache.get("k").as_deref(), Some(b"v".as_slice()));
        assert!(cache.exists("k"));
    }

    #[test]
    fn expired_entries_miss() {
        let cache = LocalCache::new(8, Duration::from_secs(60));
        cache.set("k", b"v".to_vec(), Some(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("k"), None);
        // Eviction on expired read frees the slot.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = LocalCache::new(2, Duration::from_secs(60));
        cache.set("a", b"1".to_vec(), None);
        cache.set("b", b"2".to_vec(), None);
        cache.get("a");
        cache.set("c", b"3".to_vec(), None);

        assert!(cache.exists("a"), "recently used entry survives");
        assert!(!cache.exists("b"), "least recently used entry is evicted");
        assert!(cache.exists("c"));
    }

    #[test]
    fn set_ttl_extends_expiry() {
        let cache = LocalCache::new(8, Duration::from_secs(60));
        cache.set("k", b"v".to_vec(), Some(Duration::from_millis(5)));
        cache.set_ttl("k", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.exists("k"));
    }

    #[test]
    fn delete_removes_entry() {
        let cache = LocalCache::new(8, Duration::from_secs(60));
        cache.set("k", b"v".to_vec(), None);
        cache.delete("k");
        assert!(!cache.exists("k"));
    }
}
