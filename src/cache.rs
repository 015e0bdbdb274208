// =============================================================================
// cache.rs — REMEMBERING WHAT THE EXCHANGE ALREADY TOLD US
// =============================================================================
//
// A fetch cache keyed by (function identity, arguments), each entry carrying
// its own expiry. The cache is a plain object handed to fetchers by
// reference; nothing is global and nothing expires behind your back except
// by TTL.
//
// Each cache is an LRU so a long `watch` session cannot grow without bound.
// Expired entries are evicted lazily on lookup.
//
// `CacheMode::Refresh` skips lookups entirely (the fresh result is still
// stored), which is what the manual refresh action needs.
// =============================================================================

use lru::LruCache;
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::models::{Announcement, FinancialSnapshot, PriceBar};

/// Whether a fetch may be answered from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Use,
    Refresh,
}

/// Build a cache key from a function name and its arguments.
pub fn cache_key(function: &str, args: &[&str]) -> String {
    let mut key = String::from(function);
    for arg in args {
        key.push('|');
        key.push_str(arg);
    }
    key
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl CacheStats {
    fn new() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }
}

/// One named LRU cache with a fixed TTL.
pub struct TtlCache<V: Clone> {
    name: &'static str,
    ttl: Duration,
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    stats: CacheStats,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::new(),
        }
    }

    /// Look up a live entry. Expired entries are evicted and reported as misses.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock();
        let now = Instant::now();

        let found = entries
            .get(key)
            .map(|entry| (now < entry.expires_at).then(|| entry.value.clone()));

        let live = match found {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                self.stats.expired.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => None,
        };

        match &live {
            Some(_) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(cache = self.name, key = key, "cache hit");
            }
            None => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        live
    }

    /// Look up honouring the mode: `Refresh` never hits.
    pub fn lookup(&self, key: &str, mode: CacheMode) -> Option<V> {
        match mode {
            CacheMode::Use => self.get(key),
            CacheMode::Refresh => None,
        }
    }

    pub fn insert(&self, key: String, value: V) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries.lock().put(key, entry);
    }

    pub fn invalidate(&self, key: &str) {
        if self.entries.lock().pop(key).is_some() {
            debug!(cache = self.name, key = key, "cache entry invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            name: self.name,
            entries: self.len(),
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters of one cache.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheSnapshot {
    pub name: &'static str,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
}

/// Every cache the fetchers use, bundled so it can be passed around as one.
pub struct FetchCache {
    pub announcements: TtlCache<Vec<Announcement>>,
    pub quotes: TtlCache<FinancialSnapshot>,
    pub screener: TtlCache<FinancialSnapshot>,
    pub history: TtlCache<Vec<PriceBar>>,
    pub pdf_text: TtlCache<String>,
}

impl FetchCache {
    pub fn new(data_ttl: Duration, pdf_ttl: Duration, capacity: usize) -> Self {
        Self {
            announcements: TtlCache::new("announcements", data_ttl, capacity),
            quotes: TtlCache::new("quotes", data_ttl, capacity),
            screener: TtlCache::new("screener", data_ttl, capacity),
            history: TtlCache::new("history", data_ttl, capacity),
            pdf_text: TtlCache::new("pdf_text", pdf_ttl, capacity),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.data_ttl, config.pdf_ttl, config.cache_capacity)
    }

    pub fn snapshots(&self) -> Vec<CacheSnapshot> {
        vec![
            self.announcements.snapshot(),
            self.quotes.snapshot(),
            self.screener.snapshot(),
            self.history.snapshot(),
            self.pdf_text.snapshot(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_includes_function_and_args() {
        assert_eq!(cache_key("quote", &["LT"]), "quote|LT");
        assert_ne!(cache_key("quote", &["LT"]), cache_key("history", &["LT"]));
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = TtlCache::new("test", Duration::from_secs(900), 10);
        cache.insert("k".to_string(), 42u32);
        assert_eq!(cache.get("k"), Some(42));
        assert_eq!(cache.snapshot().hits, 1);
    }

    #[test]
    fn test_expired_entry_is_evicted() {
        let cache = TtlCache::new("test", Duration::ZERO, 10);
        cache.insert("k".to_string(), 42u32);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
        let snap = cache.snapshot();
        assert_eq!(snap.expired, 1);
        assert_eq!(snap.misses, 1);
    }

    #[test]
    fn test_refresh_bypasses_lookup() {
        let cache = TtlCache::new("test", Duration::from_secs(900), 10);
        cache.insert("k".to_string(), "cached".to_string());
        assert_eq!(cache.lookup("k", CacheMode::Refresh), None);
        assert_eq!(cache.lookup("k", CacheMode::Use), Some("cached".to_string()));
    }

    #[test]
    fn test_lru_capacity_bound() {
        let cache = TtlCache::new("test", Duration::from_secs(900), 2);
        cache.insert("a".to_string(), 1);
        cache.insert("b".to_string(), 2);
        cache.insert("c".to_string(), 3);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn test_invalidate_drops_one_key() {
        let cache = FetchCache::new(Duration::from_secs(900), Duration::from_secs(3600), 10);
        cache.quotes.insert("quote|LT".to_string(), FinancialSnapshot::unknown("LT"));
        cache.quotes.insert("quote|HAL".to_string(), FinancialSnapshot::unknown("HAL"));
        cache.quotes.invalidate("quote|LT");
        assert_eq!(cache.quotes.get("quote|LT"), None);
        assert!(cache.quotes.get("quote|HAL").is_some());
        assert_eq!(cache.snapshots().iter().map(|s| s.entries).sum::<usize>(), 1);
    }
}
