//! Cache-aside repository for users.
//!
//! Write paths run in a fixed order: store write, then cache write (or
//! eviction). A cache write never precedes the store commit it reflects, so
//! a reader can never see cached data the store does not hold. Between the
//! two steps a concurrent reader may still see the previous cached value;
//! that window is accepted.

use crate::cache::{get_json, put_json, CacheConfig, CacheKey, CacheStore};
use crate::entity_store::EntityStore;
use keel_core::{
    CacheError, EntityType, KeelError, KeelResult, NewUser, PaginationWindow, StorageError, User,
    UserId, UserPatch, UserQuery,
};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Snapshot of cache effectiveness counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    pub hits: u64,
    pub misses: u64,
    pub cache_errors: u64,
}

impl RepositoryStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    cache_errors: AtomicU64,
}

/// Users read through the cache and written through the store.
#[derive(Clone)]
pub struct CachedUserRepository {
    store: Arc<dyn EntityStore>,
    cache: Arc<dyn CacheStore>,
    config: CacheConfig,
    store_timeout: Duration,
    counters: Arc<Counters>,
}

fn not_found(id: UserId) -> KeelError {
    StorageError::NotFound {
        entity_type: EntityType::User,
        id: id.to_string(),
    }
    .into()
}

impl CachedUserRepository {
    pub fn new(store: Arc<dyn EntityStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            cache,
            config: CacheConfig::default(),
            store_timeout: Duration::from_secs(5),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Upper bound for a single entity store call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    pub fn stats(&self) -> RepositoryStats {
        RepositoryStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            cache_errors: self.counters.cache_errors.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Read-through lookup by id. Not-found results are never cached.
    pub async fn get(&self, id: UserId) -> KeelResult<User> {
        let key = CacheKey::for_entity::<User>(id);
        match get_json::<User>(self.cache.as_ref(), &key).await {
            Ok(Some(user)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key, "cache hit");
                return Ok(user);
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache_key = %key, "cache miss");
            }
            Err(err) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                self.cache_failed("get", &key, &err);
                if matches!(err, KeelError::Cache(CacheError::Serialization { .. })) {
                    self.evict(&key).await;
                }
            }
        }

        let user = self
            .bounded("user_get", self.store.user_get(id))
            .await?
            .ok_or_else(|| not_found(id))?;
        self.populate(&user).await;
        Ok(user)
    }

    /// Lookup by username. Goes straight to the store.
    pub async fn get_by_username(&self, username: &str) -> KeelResult<User> {
        self.bounded("user_get_by_username", self.store.user_get_by_username(username))
            .await?
            .ok_or_else(|| {
                StorageError::NotFound {
                    entity_type: EntityType::User,
                    id: username.to_string(),
                }
                .into()
            })
    }

    /// Filtered page of users with its pagination window. Not cached.
    pub async fn list(&self, query: &UserQuery) -> KeelResult<(Vec<User>, PaginationWindow)> {
        let (users, total) = self.bounded("user_query", self.store.user_query(query)).await?;
        Ok((users, PaginationWindow::new(query.page, query.limit, total)))
    }

    pub async fn count(&self) -> KeelResult<u64> {
        self.bounded("user_count", self.store.user_count()).await
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Store insert, then populate the cache under the new id.
    pub async fn create(&self, new_user: NewUser) -> KeelResult<User> {
        let user = self.bounded("user_insert", self.store.user_insert(new_user)).await?;
        self.populate(&user).await;
        Ok(user)
    }

    /// Read current state from the store (never the cache), apply the patch,
    /// save, then overwrite the cache entry with the saved row.
    pub async fn update(&self, id: UserId, patch: &UserPatch) -> KeelResult<User> {
        let mut user = self
            .bounded("user_get", self.store.user_get(id))
            .await?
            .ok_or_else(|| not_found(id))?;
        patch.apply(&mut user);
        let saved = self.bounded("user_save", self.store.user_save(&user)).await?;
        self.populate(&saved).await;
        Ok(saved)
    }

    /// Soft delete in the store, then evict. A failed store delete leaves the
    /// cache untouched.
    pub async fn delete(&self, id: UserId) -> KeelResult<()> {
        self.bounded("user_soft_delete", self.store.user_soft_delete(id))
            .await?;
        self.evict(&CacheKey::for_entity::<User>(id)).await;
        Ok(())
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn populate(&self, user: &User) {
        let key = CacheKey::for_entity::<User>(user.id);
        if let Err(err) =
            put_json(self.cache.as_ref(), &key, user, Some(self.config.entry_ttl)).await
        {
            self.cache_failed("set", &key, &err);
        }
    }

    async fn evict(&self, key: &CacheKey) {
        if let Err(err) = self.cache.delete(key).await {
            self.cache_failed("delete", key, &err);
        }
    }

    fn cache_failed(&self, operation: &str, key: &CacheKey, err: &KeelError) {
        self.counters.cache_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            operation = operation,
            cache_key = %key,
            error = %err,
            "Cache operation failed, continuing without cache"
        );
    }

    async fn bounded<T, F>(&self, operation: &str, fut: F) -> KeelResult<T>
    where
        F: Future<Output = KeelResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(operation = operation, "Entity store call timed out");
                Err(StorageError::Timeout {
                    operation: operation.to_string(),
                }
                .into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::entity_store::InMemoryEntityStore;
    use async_trait::async_trait;

    struct BrokenCache;

    #[async_trait]
    impl CacheStore for BrokenCache {
        async fn get(&self, _key: &CacheKey) -> KeelResult<Option<Vec<u8>>> {
            Err(CacheError::Unavailable { reason: "down".into() }.into())
        }
        async fn set(&self, _: &CacheKey, _: Vec<u8>, _: Option<Duration>) -> KeelResult<()> {
            Err(CacheError::Unavailable { reason: "down".into() }.into())
        }
        async fn delete(&self, _key: &CacheKey) -> KeelResult<()> {
            Err(CacheError::Unavailable { reason: "down".into() }.into())
        }
        async fn exists(&self, _key: &CacheKey) -> KeelResult<bool> {
            Err(CacheError::Unavailable { reason: "down".into() }.into())
        }
        async fn ping(&self) -> KeelResult<()> {
            Err(CacheError::Unavailable { reason: "down".into() }.into())
        }
    }

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.into(),
            email: format!("{}@example.com", name),
            password_hash: "s$h".into(),
            first_name: "First".into(),
            last_name: "Last".into(),
        }
    }

    fn repo() -> (CachedUserRepository, InMemoryEntityStore, InMemoryCacheStore) {
        let store = InMemoryEntityStore::new();
        let cache = InMemoryCacheStore::new();
        let repo = CachedUserRepository::new(Arc::new(store.clone()), Arc::new(cache.clone()));
        (repo, store, cache)
    }

    #[tokio::test]
    async fn create_populates_cache_with_default_ttl() {
        let (repo, _, cache) = repo();
        let user = repo.create(new_user("ada")).await.unwrap();
        let key = CacheKey::for_entity::<User>(user.id);
        let ttl = cache.ttl_of(&key).unwrap().unwrap();
        assert!(ttl <= Duration::from_secs(3600) && ttl > Duration::from_secs(3590));

        let fetched = repo.get(user.id).await.unwrap();
        assert_eq!(fetched, user);
        assert_eq!(repo.stats().hits, 1);
    }

    #[tokio::test]
    async fn cold_and_warm_reads_agree() {
        let (repo, _, cache) = repo();
        let user = repo.create(new_user("ada")).await.unwrap();
        cache.delete(&CacheKey::for_entity::<User>(user.id)).await.unwrap();

        let cold = repo.get(user.id).await.unwrap();
        let warm = repo.get(user.id).await.unwrap();
        assert_eq!(cold, warm);
        assert_eq!(repo.stats(), RepositoryStats { hits: 1, misses: 1, cache_errors: 0 });
    }

    #[tokio::test]
    async fn missing_users_are_not_cached() {
        let (repo, _, cache) = repo();
        let err = repo.get(UserId(99)).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn update_overwrites_cached_copy() {
        let (repo, _, _) = repo();
        let user = repo.create(new_user("ada")).await.unwrap();
        repo.get(user.id).await.unwrap();

        let patch = UserPatch {
            first_name: Some("Augusta".into()),
            ..Default::default()
        };
        repo.update(user.id, &patch).await.unwrap();
        let after = repo.get(user.id).await.unwrap();
        assert_eq!(after.first_name, "Augusta");
        assert_eq!(repo.stats().misses, 0);
    }

    #[tokio::test]
    async fn update_reads_from_store_not_cache() {
        let (repo, _, cache) = repo();
        let user = repo.create(new_user("ada")).await.unwrap();
        let key = CacheKey::for_entity::<User>(user.id);
        let mut stale = user.clone();
        stale.last_name = "Stale".into();
        put_json(&cache, &key, &stale, None).await.unwrap();

        let saved = repo
            .update(user.id, &UserPatch { is_active: Some(false), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(saved.last_name, "Last");
    }

    #[tokio::test]
    async fn delete_evicts_and_reports_not_found() {
        let (repo, _, cache) = repo();
        let user = repo.create(new_user("ada")).await.unwrap();
        repo.delete(user.id).await.unwrap();
        assert!(!cache.exists(&CacheKey::for_entity::<User>(user.id)).await.unwrap());
        assert!(repo.get(user.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn failed_store_delete_keeps_cache_entry() {
        let (repo, _, cache) = repo();
        let key = CacheKey::for_entity::<User>(UserId(5));
        cache.set(&key, b"{}".to_vec(), None).await.unwrap();
        assert!(repo.delete(UserId(5)).await.unwrap_err().is_not_found());
        assert!(cache.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn broken_cache_degrades_to_store() {
        let store = InMemoryEntityStore::new();
        let repo = CachedUserRepository::new(Arc::new(store), Arc::new(BrokenCache));
        let user = repo.create(new_user("ada")).await.unwrap();
        assert_eq!(repo.get(user.id).await.unwrap(), user);
        repo.delete(user.id).await.unwrap();
        assert!(repo.stats().cache_errors >= 3);
    }

    #[tokio::test]
    async fn undecodable_entry_is_treated_as_miss_and_dropped() {
        let (repo, _, cache) = repo();
        let user = repo.create(new_user("ada")).await.unwrap();
        let key = CacheKey::for_entity::<User>(user.id);
        cache.set(&key, b"not json".to_vec(), None).await.unwrap();

        assert_eq!(repo.get(user.id).await.unwrap(), user);
        let cached: Option<User> = get_json(&cache, &key).await.unwrap();
        assert_eq!(cached, Some(user));
    }

    #[tokio::test]
    async fn list_returns_window() {
        let (repo, _, _) = repo();
        for i in 0..12 {
            repo.create(new_user(&format!("user{:02}", i))).await.unwrap();
        }
        let (page, window) = repo
            .list(&UserQuery::default().with_page(2).with_limit(5))
            .await
            .unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(window.total_pages, 3);
        assert!(window.has_next_page && window.has_prev_page);
        assert_eq!(repo.count().await.unwrap(), 12);
    }
}
