use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// In-process TTL'd key-value cache with a bounded entry count.
///
/// Values are immutable once inserted (reads clone). When the bound is
/// exceeded the oldest-inserted entry is evicted first. One instance
/// per value kind (candle windows, last prices, average volumes).
pub struct DataCache<V: Clone> {
    inner: Mutex<CacheInner<V>>,
    default_ttl: Duration,
    max_entries: usize,
}

struct CacheInner<V> {
    map: HashMap<String, Entry<V>>,
    seq: u64,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
    seq: u64,
}

impl<V: Clone> DataCache<V> {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                seq: 0,
            }),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Fetch a live value; expired entries are dropped on access
    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        let expired = match inner.map.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > entry.ttl,
            None => return None,
        };

        if expired {
            inner.map.remove(key);
            return None;
        }

        inner.map.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.seq += 1;
        let seq = inner.seq;

        inner.map.insert(
            key.into(),
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
                seq,
            },
        );

        while inner.map.len() > self.max_entries {
            let oldest = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.seq)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    inner.map.remove(&key);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let before = inner.map.len();
        inner.map.retain(|_, e| e.inserted_at.elapsed() <= e.ttl);
        before - inner.map.len()
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache lock poisoned").map.clear();
    }
}
