//! Process-local TTL cache
//!
//! CRM field keys and entity records change rarely but are not compile-time
//! constants, so they are cached with a TTL. The cache is owned by the client
//! instance, not global: staleness only ever causes a redundant (safe) CRM
//! read, never a missed write, so cross-process coherency is not needed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

pub struct TtlCache<V> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (V, Instant)>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.read().await;
        let (value, stored_at) = entries.get(key)?;
        if stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub async fn set(&self, key: &str, value: V) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value, Instant::now()));
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_returns_within_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("k", 42u32).await;
        assert_eq!(cache.get("k").await, Some(42));
        assert_eq!(cache.get("missing").await, None);
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.set("k", "v".to_string()).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn clear_drops_everything() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("a", 1u8).await;
        cache.set("b", 2u8).await;
        cache.clear().await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, None);
    }
}
