//! Keel Storage - System of Record and Cache
//!
//! Three layers, leaf first:
//!
//! - [`EntityStore`]: the authoritative store seam, with an in-memory
//!   implementation used by the binary in development and by every test.
//! - [`CacheStore`]: a key/value store with per-key expiry, backed either by
//!   a local `DashMap` or by Redis.
//! - [`CachedUserRepository`]: composes the two into read-through,
//!   write-overwrite, delete-invalidate semantics for users.
//!
//! The store is always the source of truth. The cache is an optimization:
//! every cache failure degrades to the store and is logged, never returned.

pub mod cache;
mod entity_store;
mod repository;

pub use cache::{
    CacheConfig, CacheKey, CacheStore, CacheableEntity, InMemoryCacheStore, RedisCacheConfig,
    RedisCacheStore,
};
pub use entity_store::{EntityStore, InMemoryEntityStore};
pub use repository::{CachedUserRepository, RepositoryStats};
