//! Deterministic cache keys.

use keel_core::{EntityType, User};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// Types that can be stored in the cache under an entity key.
pub trait CacheableEntity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Entity type segment of the key.
    fn entity_type() -> EntityType;

    /// Identity segment of the key.
    fn cache_id(&self) -> String;

    fn cache_key(&self) -> CacheKey {
        CacheKey::new(Self::entity_type(), self.cache_id())
    }
}

impl CacheableEntity for User {
    fn entity_type() -> EntityType {
        EntityType::User
    }

    fn cache_id(&self) -> String {
        self.id.to_string()
    }
}

/// `entity:{entityType}:{id}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    entity_type: EntityType,
    id: String,
}

impl CacheKey {
    pub fn new(entity_type: EntityType, id: impl fmt::Display) -> Self {
        Self {
            entity_type,
            id: id.to_string(),
        }
    }

    pub fn for_entity<T: CacheableEntity>(id: impl fmt::Display) -> Self {
        Self::new(T::entity_type(), id)
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}:{}", self.entity_type, self.id)
    }
}
