//! Explicit cache boundary for expensive pipeline stages.
//!
//! The pipeline never touches ambient global caches: a [`ResponseCache`]
//! is constructed by the caller and injected into the processor, which
//! uses it to memoize text extraction keyed by document fingerprint.
//! Anything honoring the interface substitutes — an external store, a
//! no-op, or the bundled in-process [`MemoryCache`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Get/put cache with per-entry time-to-live.
///
/// Implementations must be safe to share across concurrent pipelines.
pub trait ResponseCache: Send + Sync {
    /// Fetch a live entry, or `None` when absent or expired.
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` under `key` for at most `ttl`.
    fn put(&self, key: &str, value: String, ttl: Duration);
}

/// In-process cache: a mutex-guarded map with lazy expiry.
///
/// Expired entries are dropped on the `get` that observes them; there is no
/// background sweeper, so memory is bounded by the working set of live keys.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including not-yet-collected expired ones.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key.to_string(), (value, expires_at));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get() {
        let cache = MemoryCache::new();
        cache.put("k", "v".into(), Duration::from_secs(60));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
    }

    #[test]
    fn miss_on_absent_key() {
        let cache = MemoryCache::new();
        assert!(cache.get("missing").is_none());
    }

    #[test]
    fn expired_entry_is_dropped() {
        let cache = MemoryCache::new();
        cache.put("k", "v".into(), Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn overwrite_refreshes_value() {
        let cache = MemoryCache::new();
        cache.put("k", "old".into(), Duration::from_secs(60));
        cache.put("k", "new".into(), Duration::from_secs(60));
        assert_eq!(cache.get("k").as_deref(), Some("new"));
        assert_eq!(cache.len(), 1);
    }
}
