use super::{CacheResult, SharedMemoryStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct Entry<T> {
    value: T,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Entry<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        let expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl);
        Self { value, expires_at }
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Utc::now() >= at)
    }
}

/// In-memory backend over a store shared with other typed caches
#[derive(Clone)]
pub struct MemoryCache<T> {
    store: SharedMemoryStore,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> MemoryCache<T> {
    /// Cache with a private store
    pub fn new() -> Self {
        Self::from_shared_store(Arc::new(RwLock::new(HashMap::new())))
    }

    pub(crate) fn from_shared_store(store: SharedMemoryStore) -> Self {
        Self {
            store,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> MemoryCache<T> {
    /// Live entry for `key`; expired entries are evicted on the way out.
    async fn live_entry(&self, key: &str) -> Option<T> {
        {
            let store = self.store.read().await;
            let entry = store.get(key)?.downcast_ref::<Entry<T>>()?;
            if !entry.is_expired() {
                return Some(entry.value.clone());
            }
        }

        self.store.write().await.remove(key);
        None
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        Ok(self.live_entry(key).await)
    }

    pub async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let entry: Box<dyn std::any::Any + Send + Sync> = Box::new(Entry::new(value.clone(), ttl));
        self.store.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        self.store.write().await.remove(key);
        Ok(())
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.live_entry(key).await.is_some())
    }

    pub async fn clear(&self) -> CacheResult<()> {
        self.store.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache: MemoryCache<String> = MemoryCache::new();

        cache.set("usd_pln_rate", &"4.05".to_string(), None).await.unwrap();
        assert_eq!(
            cache.get("usd_pln_rate").await.unwrap(),
            Some("4.05".to_string())
        );
        assert!(cache.exists("usd_pln_rate").await.unwrap());

        cache.delete("usd_pln_rate").await.unwrap();
        assert_eq!(cache.get("usd_pln_rate").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache: MemoryCache<u64> = MemoryCache::new();
        cache
            .set("short", &1, Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(cache.exists("short").await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!cache.exists("short").await.unwrap());
        assert_eq!(cache.get("short").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_type_mismatch_reads_as_miss() {
        let store: SharedMemoryStore = Arc::new(RwLock::new(HashMap::new()));
        let strings = MemoryCache::<String>::from_shared_store(store.clone());
        let numbers = MemoryCache::<u64>::from_shared_store(store);

        strings.set("k", &"v".to_string(), None).await.unwrap();
        assert_eq!(numbers.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache: MemoryCache<u64> = MemoryCache::new();
        cache.set("a", &1, None).await.unwrap();
        cache.set("b", &2, None).await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
        assert_eq!(cache.get("b").await.unwrap(), None);
    }
}
