//! Advisory cache layer.
//!
//! Everything stored here can be recomputed from the database or an upstream
//! source. Callers treat a cache error as a miss and carry on.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

pub mod config;
pub mod memory;
pub mod redis;
pub mod typed;

pub use config::CacheConfig;
pub use typed::{CachedObject, TypedCache, TypedCacheBackend};
pub use typed_cache_macro::typed_cache;

/// Cache error types
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Key not found")]
    NotFound,
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Type-erased entries shared by every memory-backed `TypedCache`
pub(crate) type SharedMemoryStore =
    Arc<RwLock<HashMap<String, Box<dyn std::any::Any + Send + Sync>>>>;

#[derive(Clone)]
enum Backend {
    Memory(SharedMemoryStore),
    Redis(::redis::Client),
}

/// Hands out `TypedCache` instances that share one backend
#[derive(Clone)]
pub struct CacheManager {
    config: CacheConfig,
    backend: Backend,
}

impl CacheManager {
    /// In-process cache, used by tests and single-instance deployments
    pub fn new_memory() -> Self {
        Self {
            config: CacheConfig {
                backend: "memory".to_string(),
                ..Default::default()
            },
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
        }
    }

    /// Create cache manager from configuration
    pub async fn new_from_config(config: &CacheConfig) -> CacheResult<Self> {
        let backend = match config.backend.as_str() {
            "redis" => {
                let client = ::redis::Client::open(config.redis_url.as_str()).map_err(|e| {
                    CacheError::Connection(format!("Redis client creation failed: {}", e))
                })?;

                // Fail at startup rather than on the first cache read
                let mut conn = client
                    .get_multiplexed_tokio_connection()
                    .await
                    .map_err(|e| CacheError::Connection(format!("Redis connection failed: {}", e)))?;
                ::redis::cmd("PING")
                    .query_async::<String>(&mut conn)
                    .await
                    .map_err(|e| CacheError::Connection(format!("Redis ping failed: {}", e)))?;

                Backend::Redis(client)
            }
            "memory" => Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
            other => {
                return Err(CacheError::Cache(format!(
                    "Unknown cache backend '{}', expected 'memory' or 'redis'",
                    other
                )));
            }
        };

        Ok(Self {
            config: config.clone(),
            backend,
        })
    }

    /// Get a typed cache for type T
    pub fn cache<T: CachedObject>(&self) -> TypedCache<T> {
        let backend = match &self.backend {
            Backend::Memory(store) => {
                TypedCacheBackend::Memory(memory::MemoryCache::from_shared_store(store.clone()))
            }
            Backend::Redis(client) => TypedCacheBackend::Redis(redis::RedisCache::from_client(
                client.clone(),
                self.config.redis_key_prefix.clone(),
            )),
        };
        TypedCache::new(backend)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend_type(&self) -> &str {
        &self.config.backend
    }

    pub async fn health_check(&self) -> CacheResult<()> {
        match &self.backend {
            Backend::Memory(_) => Ok(()),
            Backend::Redis(client) => {
                redis::RedisCache::<()>::from_client(
                    client.clone(),
                    self.config.redis_key_prefix.clone(),
                )
                .health_check()
                .await
            }
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
    #[typed_cache(ttl = 60)]
    struct Marker {
        value: u32,
    }

    #[tokio::test]
    async fn test_caches_share_memory_store() {
        let manager = CacheManager::new_memory();
        let first = manager.cache::<Marker>();
        let second = manager.cache::<Marker>();

        first.set("k", &Marker { value: 7 }).await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(Marker { value: 7 }));

        second.delete("k").await.unwrap();
        assert_eq!(first.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected() {
        let config = CacheConfig {
            backend: "memcached".to_string(),
            ..Default::default()
        };
        assert!(CacheManager::new_from_config(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_health_check() {
        let manager = CacheManager::new_memory();
        assert!(manager.health_check().await.is_ok());
        assert_eq!(manager.backend_type(), "memory");
    }
}
