use super::{CacheError, CacheResult, CachedObject};
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use std::{sync::Arc, time::Duration};
use tokio::sync::Mutex;

/// Redis backend storing postcard-encoded values
#[derive(Clone)]
pub struct RedisCache<T> {
    client: Client,
    connection: Arc<Mutex<Option<MultiplexedConnection>>>,
    key_prefix: String,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> RedisCache<T> {
    pub fn new(redis_url: &str, key_prefix: String) -> CacheResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| CacheError::Connection(format!("Redis client error: {}", e)))?;
        Ok(Self::from_client(client, key_prefix))
    }

    pub(crate) fn from_client(client: Client, key_prefix: String) -> Self {
        Self {
            client,
            connection: Arc::new(Mutex::new(None)),
            key_prefix,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Reuse the pooled connection, reconnecting if it went away
    async fn connection(&self) -> CacheResult<MultiplexedConnection> {
        let mut slot = self.connection.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CacheError::Connection(format!("Connection failed: {}", e)))?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    async fn drop_connection(&self) {
        *self.connection.lock().await = None;
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    pub async fn health_check(&self) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("PING").query_async::<String>(&mut conn).await;
        if let Err(e) = result {
            self.drop_connection().await;
            return Err(CacheError::Connection(format!("Ping failed: {}", e)));
        }
        Ok(())
    }

    async fn run<R, F, Fut>(&self, op: F) -> CacheResult<R>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = redis::RedisResult<R>>,
    {
        let conn = self.connection().await?;
        match op(conn).await {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() {
                    self.drop_connection().await;
                }
                Err(CacheError::Cache(e.to_string()))
            }
        }
    }
}

impl<T: CachedObject> RedisCache<T> {
    pub async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let key = self.prefixed_key(key);
        let data: Option<Vec<u8>> = self
            .run(|mut conn| async move { conn.get(&key).await })
            .await?;

        data.map(|bytes| {
            postcard::from_bytes(&bytes).map_err(|e| CacheError::Serialization(e.to_string()))
        })
        .transpose()
    }

    pub async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let key = self.prefixed_key(key);
        let data =
            postcard::to_allocvec(value).map_err(|e| CacheError::Serialization(e.to_string()))?;

        match ttl {
            // SETEX rejects zero, round sub-second TTLs up
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.run(|mut conn| async move { conn.set_ex::<_, _, ()>(&key, data, secs).await })
                    .await
            }
            None => {
                self.run(|mut conn| async move { conn.set::<_, _, ()>(&key, data).await })
                    .await
            }
        }
    }

    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let key = self.prefixed_key(key);
        self.run(|mut conn| async move { conn.del::<_, ()>(&key).await })
            .await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        let key = self.prefixed_key(key);
        self.run(|mut conn| async move { conn.exists(&key).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix() {
        let cache: RedisCache<String> =
            RedisCache::new("redis://localhost:6379", "usage_metering:".to_string()).unwrap();
        assert_eq!(cache.prefixed_key("k"), "usage_metering:k");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let result: CacheResult<RedisCache<String>> =
            RedisCache::new("not a url", "p:".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_postcard_keeps_decimal_exact() {
        use rust_decimal::Decimal;

        for value in [
            Decimal::ZERO,
            Decimal::new(13, 3),
            Decimal::new(123_456_789, 9),
            Decimal::new(-1, 28),
        ] {
            let bytes = postcard::to_allocvec(&value).unwrap();
            let back: Decimal = postcard::from_bytes(&bytes).unwrap();
            assert_eq!(back, value);
        }
    }
}
