//! In-memory TTL cache for prices and account balances, with an optional
//! Redis mirror for cross-process sharing.
//!
//! The in-memory map is always authoritative for reads — the mirror, when
//! enabled, is a best-effort write-through sink so a second process (or a
//! restarted one) can warm its own cache from Redis instead of the exchange.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[cfg(feature = "redis-mirror")]
pub mod redis_mirror;
pub mod market;

pub use market::MarketCache;

/// Default freshness window for cached prices.
pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(30);

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A simple TTL-bounded key-value cache, safe to share across tasks via
/// `Clone` (it's an `Arc` internally).
#[derive(Clone)]
pub struct TtlCache<K, V> {
    inner: Arc<Mutex<HashMap<K, Entry<V>>>>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            default_ttl,
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().await;
        match guard.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        let mut guard = self.inner.lock().await;
        guard.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.lock().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn returns_value_within_ttl() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_secs(30));
        cache.set("BTCUSDT".to_string(), 30000).await;
        assert_eq!(cache.get(&"BTCUSDT".to_string()).await, Some(30000));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_entries_past_ttl() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_secs(30));
        cache.set("BTCUSDT".to_string(), 30000).await;
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cache.get(&"BTCUSDT".to_string()).await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_removes_entry_immediately() {
        let cache: TtlCache<String, u64> = TtlCache::new(Duration::from_secs(30));
        cache.set("BTCUSDT".to_string(), 30000).await;
        cache.invalidate(&"BTCUSDT".to_string()).await;
        assert_eq!(cache.get(&"BTCUSDT".to_string()).await, None);
    }
}
