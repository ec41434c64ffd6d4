//! Typed cache handles.
//!
//! Keys are namespaced by the type's prefix and layout hash, so two types can
//! use the same logical key without colliding.

use super::{CacheResult, memory::MemoryCache, redis::RedisCache};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Clone)]
pub enum TypedCacheBackend<T> {
    Memory(MemoryCache<T>),
    Redis(RedisCache<T>),
}

/// Implemented by `#[typed_cache]`
pub trait CachedObject:
    Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static
{
    fn cache_prefix() -> &'static str;

    fn cache_type_hash() -> u64;

    fn default_ttl() -> Option<Duration> {
        None
    }
}

#[derive(Clone)]
pub struct TypedCache<T: CachedObject> {
    backend: TypedCacheBackend<T>,
    default_ttl: Option<Duration>,
    _phantom: PhantomData<T>,
}

impl<T: CachedObject> TypedCache<T> {
    pub(crate) fn new(backend: TypedCacheBackend<T>) -> Self {
        Self {
            backend,
            default_ttl: T::default_ttl(),
            _phantom: PhantomData,
        }
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{:x}:{}", T::cache_prefix(), T::cache_type_hash(), key)
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let key = self.cache_key(key);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.get(&key).await,
            TypedCacheBackend::Redis(cache) => cache.get(&key).await,
        }
    }

    /// Store with an explicit TTL, falling back to the type's default
    pub async fn set_with_ttl(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let key = self.cache_key(key);
        let ttl = ttl.or(self.default_ttl);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.set(&key, value, ttl).await,
            TypedCacheBackend::Redis(cache) => cache.set(&key, value, ttl).await,
        }
    }

    pub async fn set(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set_with_ttl(key, value, None).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.cache_key(key);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.delete(&key).await,
            TypedCacheBackend::Redis(cache) => cache.delete(&key).await,
        }
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = self.cache_key(key);
        match &self.backend {
            TypedCacheBackend::Memory(cache) => cache.exists(&key).await,
            TypedCacheBackend::Redis(cache) => cache.exists(&key).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::typed_cache;

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[typed_cache(ttl = 300, prefix = "rate")]
    struct RateEntry {
        rate: String,
    }

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[typed_cache]
    struct ClientEntry {
        id: String,
    }

    fn memory<T: CachedObject>() -> TypedCache<T> {
        TypedCache::new(TypedCacheBackend::Memory(MemoryCache::new()))
    }

    #[test]
    fn test_macro_options() {
        assert_eq!(RateEntry::cache_prefix(), "rate");
        assert_eq!(RateEntry::default_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(ClientEntry::cache_prefix(), "ClientEntry");
        assert_eq!(ClientEntry::default_ttl(), None);
        assert_ne!(RateEntry::cache_type_hash(), ClientEntry::cache_type_hash());
    }

    #[test]
    fn test_keys_namespaced_by_type() {
        let rates = memory::<RateEntry>();
        let clients = memory::<ClientEntry>();
        assert_ne!(rates.cache_key("acme"), clients.cache_key("acme"));
        assert!(rates.cache_key("acme").starts_with("rate:"));
    }

    #[tokio::test]
    async fn test_set_then_delete() {
        let cache = memory::<RateEntry>();
        let entry = RateEntry {
            rate: "4.0134".to_string(),
        };
        cache.set("usd_pln", &entry).await.unwrap();
        assert_eq!(cache.get("usd_pln").await.unwrap(), Some(entry));

        cache.delete("usd_pln").await.unwrap();
        assert!(!cache.exists("usd_pln").await.unwrap());
    }
}
