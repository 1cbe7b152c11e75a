//! Redis-backed cache.
//!
//! Uses `redis::aio::ConnectionManager`, which multiplexes one connection and
//! reconnects on its own; clones share the underlying connection. Every round
//! trip is bounded by `operation_timeout` so a stalled Redis cannot hold a
//! request hostage.

use super::key::CacheKey;
use super::traits::CacheStore;
use async_trait::async_trait;
use keel_core::{CacheError, KeelResult};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use std::future::Future;
use std::time::Duration;

/// Configuration for [`RedisCacheStore`].
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    /// Namespace prepended to every key, e.g. `keel:`.
    pub key_prefix: String,
    /// Upper bound for a single Redis round trip.
    pub operation_timeout: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            operation_timeout: Duration::from_millis(500),
        }
    }
}

#[derive(Clone)]
pub struct RedisCacheStore {
    connection: ConnectionManager,
    config: RedisCacheConfig,
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn unavailable(err: RedisError) -> CacheError {
    CacheError::Unavailable {
        reason: err.to_string(),
    }
}

impl RedisCacheStore {
    /// Connect to Redis at `url` (e.g. `redis://127.0.0.1/`).
    ///
    /// # Errors
    /// Returns `CacheError::Unavailable` if the URL is invalid or the initial
    /// connection fails.
    pub async fn connect(url: &str, config: RedisCacheConfig) -> KeelResult<Self> {
        let client = Client::open(url).map_err(unavailable)?;
        let connection = tokio::time::timeout(
            config.operation_timeout,
            ConnectionManager::new(client),
        )
        .await
        .map_err(|_| CacheError::Timeout {
            operation: "connect".into(),
        })?
        .map_err(unavailable)?;
        Ok(Self { connection, config })
    }

    fn make_key(&self, key: &CacheKey) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> KeelResult<T>
    where
        F: Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result.map_err(|err| unavailable(err).into()),
            Err(_) => Err(CacheError::Timeout {
                operation: operation.to_string(),
            }
            .into()),
        }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> KeelResult<Option<Vec<u8>>> {
        let key = self.make_key(key);
        let mut conn = self.connection.clone();
        self.bounded("get", async move { conn.get::<_, Option<Vec<u8>>>(&key).await })
            .await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> KeelResult<()> {
        let key = self.make_key(key);
        let mut conn = self.connection.clone();
        match ttl {
            // SET EX rejects zero, so sub-second TTLs round up.
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                self.bounded("set", async move {
                    conn.set_ex::<_, _, ()>(&key, value, secs).await
                })
                .await
            }
            None => {
                self.bounded("set", async move { conn.set::<_, _, ()>(&key, value).await })
                    .await
            }
        }
    }

    async fn delete(&self, key: &CacheKey) -> KeelResult<()> {
        let key = self.make_key(key);
        let mut conn = self.connection.clone();
        self.bounded("delete", async move { conn.del::<_, ()>(&key).await })
            .await
    }

    async fn exists(&self, key: &CacheKey) -> KeelResult<bool> {
        let key = self.make_key(key);
        let mut conn = self.connection.clone();
        self.bounded("exists", async move { conn.exists::<_, bool>(&key).await })
            .await
    }

    async fn ping(&self) -> KeelResult<()> {
        let mut conn = self.connection.clone();
        let _pong: String = self
            .bounded("ping", async move {
                let pong: Result<String, RedisError> =
                    redis::cmd("PING").query_async(&mut conn).await;
                pong
            })
            .await?;
        Ok(())
    }
}
