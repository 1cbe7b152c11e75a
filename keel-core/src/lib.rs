//! Keel Core - Entity Types
//!
//! Plain data structures shared by every other crate in the workspace:
//! the user entity and its patch/query shapes, the error taxonomy, and the
//! pagination window math. No I/O lives here.

mod error;
mod pagination;
mod password;
mod user;

pub use error::{CacheError, KeelError, KeelResult, StorageError};
pub use pagination::{PaginationWindow, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
pub use password::{PasswordHasher, Sha256PasswordHasher};
pub use user::{NewUser, SortField, User, UserId, UserPatch, UserQuery};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// ENTITY TYPES
// ============================================================================

/// Entity kinds known to the system.
///
/// The lowercase name doubles as the event category and the cache key
/// segment, so renaming a variant changes both wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    User,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
