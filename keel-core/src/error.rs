//! Error types for Keel operations

use crate::EntityType;
use thiserror::Error;

/// System-of-record errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: EntityType, id: String },

    #[error("Conflict on {entity_type}: {reason}")]
    Conflict { entity_type: EntityType, reason: String },

    #[error("Insert failed for {entity_type}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: String,
        reason: String,
    },

    #[error("Entity store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Entity store timed out during {operation}")]
    Timeout { operation: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Cache errors. Always treated as transient by callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Cache value could not be (de)serialized: {reason}")]
    Serialization { reason: String },

    #[error("Cache timed out during {operation}")]
    Timeout { operation: String },
}

/// Master error type for all Keel errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeelError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl KeelError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KeelError::Storage(err) if err.is_not_found())
    }
}

/// Result type alias for Keel operations.
pub type KeelResult<T> = Result<T, KeelError>;
