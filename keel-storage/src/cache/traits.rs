//! Cache store trait and JSON value helpers.

use super::key::CacheKey;
use async_trait::async_trait;
use keel_core::{CacheError, KeelResult};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Pluggable key/value cache.
///
/// Implementations must be safe for concurrent use and must replace a key's
/// value atomically: a reader observes either the previous bytes or the new
/// ones, never a mix.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch raw bytes. Expired entries read as `None`.
    async fn get(&self, key: &CacheKey) -> KeelResult<Option<Vec<u8>>>;

    /// Store bytes, replacing any previous value. `ttl: None` never expires.
    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> KeelResult<()>;

    /// Remove a key. Removing an absent key is not an error.
    async fn delete(&self, key: &CacheKey) -> KeelResult<()>;

    async fn exists(&self, key: &CacheKey) -> KeelResult<bool>;

    /// Liveness probe for health reporting.
    async fn ping(&self) -> KeelResult<()>;
}

/// Read and decode a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    cache: &dyn CacheStore,
    key: &CacheKey,
) -> KeelResult<Option<T>> {
    match cache.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            CacheError::Serialization {
                reason: err.to_string(),
            }
            .into()
        }),
        None => Ok(None),
    }
}

/// Encode and store a JSON value.
pub async fn put_json<T: Serialize + Sync>(
    cache: &dyn CacheStore,
    key: &CacheKey,
    value: &T,
    ttl: Option<Duration>,
) -> KeelResult<()> {
    let bytes = serde_json::to_vec(value).map_err(|err| CacheError::Serialization {
        reason: err.to_string(),
    })?;
    cache.set(key, bytes, ttl).await
}

/// Cache behaviour for the repository layer.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied to every entity entry.
    pub entry_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_ttl: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }
}
