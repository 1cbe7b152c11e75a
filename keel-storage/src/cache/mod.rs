//! Key/value cache with per-key expiry.
//!
//! Entries are addressed by [`CacheKey`] (`entity:{entityType}:{id}`) and hold
//! a JSON-serialized entity. A write either carries a TTL (the default path,
//! one hour) or none at all for settings-like data that is invalidated
//! explicitly.
//!
//! Two backends ship with the crate: [`InMemoryCacheStore`] for single-process
//! deployments and tests, and [`RedisCacheStore`] for shared caches.

mod key;
mod memory;
mod redis_backend;
mod traits;

pub use key::{CacheKey, CacheableEntity};
pub use memory::InMemoryCacheStore;
pub use redis_backend::{RedisCacheConfig, RedisCacheStore};
pub use traits::{get_json, put_json, CacheConfig, CacheStore};
