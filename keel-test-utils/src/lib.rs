//! Keel Test Utilities
//!
//! Shared test infrastructure for the Keel workspace:
//! - A [`Journal`] that records the order in which store, cache and broker
//!   calls happen, with recording wrappers around the in-memory backends
//! - Failing fakes for every external dependency
//! - Proptest generators for user inputs
//! - Fixtures for common scenarios

pub use keel_core::{
    KeelError, KeelResult, NewUser, PaginationWindow, StorageError, User, UserId, UserPatch,
    UserQuery,
};
pub use keel_events::{BrokerError, InMemoryBroker, MessageBroker, OutboundMessage};
pub use keel_storage::{CacheKey, CacheStore, EntityStore, InMemoryCacheStore, InMemoryEntityStore};

use async_trait::async_trait;
use keel_core::CacheError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// CALL JOURNAL
// ============================================================================

/// Which backend a journal entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Store,
    Cache,
    Broker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub backend: Backend,
    pub operation: String,
    /// Cache key, routing key or user id, when the call has one.
    pub target: Option<String>,
}

/// Shared, ordered log of backend calls.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, backend: Backend, operation: &str, target: Option<String>) {
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(JournalEntry {
                backend,
                operation: operation.to_string(),
                target,
            });
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Entries rendered as `backend.operation`, e.g. `store.user_insert`.
    pub fn operations(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| {
                let backend = match entry.backend {
                    Backend::Store => "store",
                    Backend::Cache => "cache",
                    Backend::Broker => "broker",
                };
                format!("{}.{}", backend, entry.operation)
            })
            .collect()
    }

    /// Position of the first entry matching `backend.operation`.
    pub fn position(&self, operation: &str) -> Option<usize> {
        self.operations().iter().position(|op| op == operation)
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clear();
    }

    /// Poll until an entry for `operation` appears. Broker entries are
    /// written by the publisher's background worker, so tests wait on them.
    pub async fn wait_for(&self, operation: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.position(operation).is_some() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// ============================================================================
// RECORDING BACKENDS
// ============================================================================

/// [`InMemoryEntityStore`] that journals every call before delegating.
#[derive(Clone)]
pub struct RecordingEntityStore {
    inner: InMemoryEntityStore,
    journal: Journal,
}

impl RecordingEntityStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: InMemoryEntityStore::new(),
            journal,
        }
    }

    pub fn inner(&self) -> &InMemoryEntityStore {
        &self.inner
    }
}

#[async_trait]
impl EntityStore for RecordingEntityStore {
    async fn user_insert(&self, new_user: NewUser) -> KeelResult<User> {
        let user = self.inner.user_insert(new_user).await?;
        self.journal
            .record(Backend::Store, "user_insert", Some(user.id.to_string()));
        Ok(user)
    }

    async fn user_get(&self, id: UserId) -> KeelResult<Option<User>> {
        self.journal
            .record(Backend::Store, "user_get", Some(id.to_string()));
        self.inner.user_get(id).await
    }

    async fn user_get_by_username(&self, username: &str) -> KeelResult<Option<User>> {
        self.journal
            .record(Backend::Store, "user_get_by_username", Some(username.to_string()));
        self.inner.user_get_by_username(username).await
    }

    async fn user_save(&self, user: &User) -> KeelResult<User> {
        let saved = self.inner.user_save(user).await?;
        self.journal
            .record(Backend::Store, "user_save", Some(saved.id.to_string()));
        Ok(saved)
    }

    async fn user_soft_delete(&self, id: UserId) -> KeelResult<()> {
        self.inner.user_soft_delete(id).await?;
        self.journal
            .record(Backend::Store, "user_soft_delete", Some(id.to_string()));
        Ok(())
    }

    async fn user_query(&self, query: &UserQuery) -> KeelResult<(Vec<User>, u64)> {
        self.journal.record(Backend::Store, "user_query", None);
        self.inner.user_query(query).await
    }

    async fn user_count(&self) -> KeelResult<u64> {
        self.journal.record(Backend::Store, "user_count", None);
        self.inner.user_count().await
    }

    async fn ping(&self) -> KeelResult<()> {
        self.inner.ping().await
    }
}

/// [`InMemoryCacheStore`] that journals every call before delegating.
#[derive(Clone)]
pub struct RecordingCacheStore {
    inner: InMemoryCacheStore,
    journal: Journal,
}

impl RecordingCacheStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: InMemoryCacheStore::new(),
            journal,
        }
    }

    pub fn inner(&self) -> &InMemoryCacheStore {
        &self.inner
    }
}

#[async_trait]
impl CacheStore for RecordingCacheStore {
    async fn get(&self, key: &CacheKey) -> KeelResult<Option<Vec<u8>>> {
        self.journal
            .record(Backend::Cache, "get", Some(key.to_string()));
        self.inner.get(key).await
    }

    async fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Option<Duration>) -> KeelResult<()> {
        self.journal
            .record(Backend::Cache, "set", Some(key.to_string()));
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &CacheKey) -> KeelResult<()> {
        self.journal
            .record(Backend::Cache, "delete", Some(key.to_string()));
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &CacheKey) -> KeelResult<bool> {
        self.inner.exists(key).await
    }

    async fn ping(&self) -> KeelResult<()> {
        self.inner.ping().await
    }
}

/// [`InMemoryBroker`] that journals accepted publishes and keeps a copy.
#[derive(Clone, Default)]
pub struct RecordingBroker {
    inner: InMemoryBroker,
    journal: Journal,
    published: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingBroker {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: InMemoryBroker::default(),
            journal,
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inner(&self) -> &InMemoryBroker {
        &self.inner
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.published
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn routing_keys(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|message| message.routing_key)
            .collect()
    }
}

#[async_trait]
impl MessageBroker for RecordingBroker {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BrokerError> {
        self.inner.declare_exchange(exchange).await
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), BrokerError> {
        self.inner.publish(message.clone()).await?;
        self.journal
            .record(Backend::Broker, "publish", Some(message.routing_key.clone()));
        self.published
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .push(message);
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close().await
    }
}

// ============================================================================
// FAILING BACKENDS
// ============================================================================

/// Entity store that is unreachable for every call.
#[derive(Debug, Clone, Default)]
pub struct UnavailableEntityStore;

fn store_down() -> KeelError {
    StorageError::Unavailable {
        reason: "connection refused".into(),
    }
    .into()
}

#[async_trait]
impl EntityStore for UnavailableEntityStore {
    async fn user_insert(&self, _new_user: NewUser) -> KeelResult<User> {
        Err(store_down())
    }
    async fn user_get(&self, _id: UserId) -> KeelResult<Option<User>> {
        Err(store_down())
    }
    async fn user_get_by_username(&self, _username: &str) -> KeelResult<Option<User>> {
        Err(store_down())
    }
    async fn user_save(&self, _user: &User) -> KeelResult<User> {
        Err(store_down())
    }
    async fn user_soft_delete(&self, _id: UserId) -> KeelResult<()> {
        Err(store_down())
    }
    async fn user_query(&self, _query: &UserQuery) -> KeelResult<(Vec<User>, u64)> {
        Err(store_down())
    }
    async fn user_count(&self) -> KeelResult<u64> {
        Err(store_down())
    }
    async fn ping(&self) -> KeelResult<()> {
        Err(store_down())
    }
}

/// Cache whose every operation fails.
#[derive(Debug, Clone, Default)]
pub struct FailingCacheStore;

fn cache_down() -> KeelError {
    CacheError::Unavailable {
        reason: "connection refused".into(),
    }
    .into()
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, _key: &CacheKey) -> KeelResult<Option<Vec<u8>>> {
        Err(cache_down())
    }
    async fn set(&self, _: &CacheKey, _: Vec<u8>, _: Option<Duration>) -> KeelResult<()> {
        Err(cache_down())
    }
    async fn delete(&self, _key: &CacheKey) -> KeelResult<()> {
        Err(cache_down())
    }
    async fn exists(&self, _key: &CacheKey) -> KeelResult<bool> {
        Err(cache_down())
    }
    async fn ping(&self) -> KeelResult<()> {
        Err(cache_down())
    }
}

/// Broker that fails on declare, on publish, or both.
#[derive(Debug, Clone)]
pub struct FailingBroker {
    fail_declare: bool,
}

impl FailingBroker {
    /// Declares fine, rejects every publish.
    pub fn on_publish() -> Self {
        Self { fail_declare: false }
    }

    /// Rejects the exchange declaration, so the publisher starts disabled.
    pub fn on_declare() -> Self {
        Self { fail_declare: true }
    }
}

#[async_trait]
impl MessageBroker for FailingBroker {
    async fn declare_exchange(&self, _exchange: &str) -> Result<(), BrokerError> {
        if self.fail_declare {
            return Err(BrokerError::Unavailable {
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }

    async fn publish(&self, _message: OutboundMessage) -> Result<(), BrokerError> {
        Err(BrokerError::Unavailable {
            reason: "connection reset".into(),
        })
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// A valid user with a placeholder hash.
pub fn new_user(username: &str) -> NewUser {
    NewUser {
        username: username.to_string(),
        email: format!("{}@example.com", username),
        password_hash: "salt$hash".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::option;
    use proptest::prelude::*;

    /// Usernames that pass validation (3..=50 chars).
    pub fn arb_username() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{2,20}"
    }

    /// Well-formed emails within the 100 char limit.
    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z][a-z0-9.]{0,15}", "[a-z]{2,12}", "(com|org|net|io)")
            .prop_map(|(local, domain, tld)| format!("{}@{}.{}", local, domain, tld))
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Z][a-z]{1,20}"
    }

    pub fn arb_password() -> impl Strategy<Value = String> {
        "[A-Za-z0-9!@#]{6,40}"
    }

    pub fn arb_new_user() -> impl Strategy<Value = NewUser> {
        (arb_username(), arb_email(), arb_name(), arb_name()).prop_map(
            |(username, email, first_name, last_name)| NewUser {
                username,
                email,
                password_hash: "salt$hash".to_string(),
                first_name,
                last_name,
            },
        )
    }

    /// Patches that never touch the unique username/email columns, so any
    /// number of them can be applied to one user without conflicts.
    pub fn arb_user_patch() -> impl Strategy<Value = UserPatch> {
        (
            option::of(arb_name()),
            option::of(arb_name()),
            option::of(any::<bool>()),
        )
            .prop_map(|(first_name, last_name, is_active)| UserPatch {
                username: None,
                email: None,
                first_name,
                last_name,
                is_active,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn journal_orders_store_before_cache() {
        let journal = Journal::new();
        let store = RecordingEntityStore::new(journal.clone());
        let cache = RecordingCacheStore::new(journal.clone());

        let user = store.user_insert(new_user("ada")).await.unwrap();
        let key = CacheKey::for_entity::<User>(user.id);
        cache.set(&key, b"{}".to_vec(), None).await.unwrap();

        assert_eq!(journal.operations(), vec!["store.user_insert", "cache.set"]);
        assert_eq!(journal.entries()[1].target.as_deref(), Some("entity:user:1"));
    }

    #[tokio::test]
    async fn failed_store_writes_are_not_journaled() {
        let journal = Journal::new();
        let store = RecordingEntityStore::new(journal.clone());
        assert!(store.user_soft_delete(UserId(9)).await.is_err());
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn recording_broker_keeps_accepted_messages() {
        let journal = Journal::new();
        let broker = RecordingBroker::new(journal.clone());
        broker.declare_exchange("keel.events").await.unwrap();
        broker
            .publish(OutboundMessage {
                exchange: "keel.events".into(),
                routing_key: "user.created".into(),
                content_type: "application/json".into(),
                body: b"{}".to_vec(),
            })
            .await
            .unwrap();

        assert_eq!(broker.routing_keys(), vec!["user.created"]);
        assert!(journal.wait_for("broker.publish", Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn failing_fakes_fail() {
        assert!(FailingCacheStore.ping().await.is_err());
        assert!(UnavailableEntityStore.ping().await.is_err());
        assert!(FailingBroker::on_declare().declare_exchange("x").await.is_err());
        assert!(FailingBroker::on_publish().declare_exchange("x").await.is_ok());
    }
}
