//! Process-local cache backend.

use super::key::CacheKey;
use super::traits::CacheStore;
use async_trait::async_trait;
use dashmap::DashMap;
use keel_core::KeelResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Every this many writes, `set` sweeps out expired entries.
pub const SWEEP_EVERY_WRITES: usize = 256;

/// `DashMap`-backed cache. An expired entry is dropped when it is read, and
/// writes periodically sweep the whole map so unread entries do not pile up.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<DashMap<String, Entry>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired cache entries");
        }
        removed
    }

    /// Number of stored entries, expired ones included until swept or read.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remaining lifetime of a live entry. `Some(None)` means no expiry.
    pub fn ttl_of(&self, key: &CacheKey) -> Option<Option<Duration>> {
        let now = Instant::now();
        self.entries
            .get(&key.to_string())
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at.map(|at| at - now))
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> KeelResult<Option<Vec<u8>>> {
        let key = key.to_string();
        let now = Instant::now();
        if let Some(entry) = self.entries.get(&key) {
            if entry.is_live(now) {
                return Ok(Some(entry.bytes.clone()));
            }
        }
        self.entries.remove_if(&key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> KeelResult<()> {
        if self.writes.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY_WRITES == SWEEP_EVERY_WRITES - 1 {
            self.purge_expired();
        }
        let entry = Entry {
            bytes: value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> KeelResult<()> {
        self.entries.remove(&key.to_string());
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> KeelResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn ping(&self) -> KeelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::EntityType;

    fn key(id: i64) -> CacheKey {
        CacheKey::new(EntityType::User, id)
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCacheStore::new();
        cache
            .set(&key(1), b"v".to_vec(), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(cache.exists(&key(1)).await.unwrap());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&key(1)).await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = InMemoryCacheStore::new();
        cache.set(&key(1), b"a".to_vec(), Some(Duration::from_secs(5))).await.unwrap();
        cache.set(&key(2), b"b".to_vec(), Some(Duration::from_secs(60))).await.unwrap();
        cache.set(&key(3), b"c".to_vec(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_sweep_unread_expired_entries() {
        let cache = InMemoryCacheStore::new();
        cache.set(&key(0), b"old".to_vec(), Some(Duration::from_secs(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        // The expired key is never read again; writes alone must evict it.
        for id in 1..=SWEEP_EVERY_WRITES as i64 {
            cache.set(&key(id), b"v".to_vec(), None).await.unwrap();
        }
        assert_eq!(cache.len(), SWEEP_EVERY_WRITES);
        assert_eq!(cache.ttl_of(&key(0)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_less_entries_persist() {
        let cache = InMemoryCacheStore::new();
        cache.set(&key(1), b"v".to_vec(), None).await.unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(cache.get(&key(1)).await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(cache.ttl_of(&key(1)), Some(None));
    }

    #[tokio::test]
    async fn set_replaces_and_delete_removes() {
        let cache = InMemoryCacheStore::new();
        cache.set(&key(1), b"a".to_vec(), None).await.unwrap();
        cache.set(&key(1), b"b".to_vec(), None).await.unwrap();
        assert_eq!(cache.get(&key(1)).await.unwrap(), Some(b"b".to_vec()));
        cache.delete(&key(1)).await.unwrap();
        cache.delete(&key(1)).await.unwrap();
        assert!(!cache.exists(&key(1)).await.unwrap());
    }
}
