// ask-service-rs/src/cache.rs
//
// Small TTL cache for the overview/analytics endpoints. The underlying
// dataset is immutable after startup, so cached payloads only exist to skip
// recomputing the aggregate queries; entries expire after a fixed TTL and
// the map is bounded so parameterized keys cannot grow it without limit.

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_TTL_SECS: u64 = 300;
pub const DEFAULT_CAPACITY: usize = 64;

struct CacheEntry {
    stored_at: Instant,
    seq: u64,
    value: Value,
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

pub struct OverviewCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

impl OverviewCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            Duration::from_secs(config_rs::get_env_or("OVERVIEW_CACHE_TTL_SECS", DEFAULT_TTL_SECS)),
            DEFAULT_CAPACITY,
        )
    }

    /// Fetch a live entry; expired entries are dropped on read.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().await;
        match inner.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store an entry. At capacity, expired entries are swept first; if the
    /// map is still full the least recently inserted entry is evicted.
    pub async fn put(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock().await;

        if inner.entries.len() >= self.capacity && !inner.entries.contains_key(key) {
            let ttl = self.ttl;
            inner
                .entries
                .retain(|_, entry| entry.stored_at.elapsed() < ttl);

            if inner.entries.len() >= self.capacity {
                if let Some(oldest) = inner
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(k, _)| k.clone())
                {
                    inner.entries.remove(&oldest);
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                stored_at: Instant::now(),
                seq,
                value,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_round_trip() {
        let cache = OverviewCache::new(Duration::from_secs(60), 8);
        assert!(cache.get("parties").await.is_none());
        cache.put("parties", json!([{"party": "BJP"}])).await;
        assert_eq!(cache.get("parties").await, Some(json!([{"party": "BJP"}])));
    }

    #[tokio::test]
    async fn test_expired_entries_are_dropped() {
        let cache = OverviewCache::new(Duration::ZERO, 8);
        cache.put("parties", json!(1)).await;
        assert!(cache.get("parties").await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = OverviewCache::new(Duration::from_secs(60), 2);
        cache.put("a", json!(1)).await;
        cache.put("b", json!(2)).await;
        cache.put("c", json!(3)).await;

        // "a" was the oldest entry; the two newest survive.
        assert!(cache.get("a").await.is_none());
        assert_eq!(cache.get("b").await, Some(json!(2)));
        assert_eq!(cache.get("c").await, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = OverviewCache::new(Duration::from_secs(60), 2);
        cache.put("a", json!(1)).await;
        cache.put("b", json!(2)).await;
        cache.put("a", json!(10)).await;
        assert_eq!(cache.get("a").await, Some(json!(10)));
        assert_eq!(cache.get("b").await, Some(json!(2)));
    }
}
