//! The system-of-record seam.

use async_trait::async_trait;
use chrono::Utc;
use keel_core::{
    EntityType, KeelResult, NewUser, StorageError, User, UserId, UserQuery,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

/// Authoritative user storage.
///
/// Implementations provide atomic single-row operations. Soft-deleted rows
/// are invisible to every read.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a new user. Duplicate username or email yields `Conflict`.
    async fn user_insert(&self, new_user: NewUser) -> KeelResult<User>;

    /// Get a live user by id.
    async fn user_get(&self, id: UserId) -> KeelResult<Option<User>>;

    /// Get a live user by exact username.
    async fn user_get_by_username(&self, username: &str) -> KeelResult<Option<User>>;

    /// Persist every attribute of `user`, bumping `updated_at`.
    /// Returns the row as stored.
    async fn user_save(&self, user: &User) -> KeelResult<User>;

    /// Mark a live user deleted. `NotFound` if there is none.
    async fn user_soft_delete(&self, id: UserId) -> KeelResult<()>;

    /// Filtered, sorted page of users plus the total number of matches.
    async fn user_query(&self, query: &UserQuery) -> KeelResult<(Vec<User>, u64)>;

    /// Number of live users.
    async fn user_count(&self) -> KeelResult<u64>;

    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> KeelResult<()>;
}

fn not_found(id: UserId) -> StorageError {
    StorageError::NotFound {
        entity_type: EntityType::User,
        id: id.to_string(),
    }
}

/// In-memory store for development and tests.
#[derive(Debug, Clone)]
pub struct InMemoryEntityStore {
    users: Arc<RwLock<HashMap<UserId, User>>>,
    next_id: Arc<AtomicI64>,
}

impl Default for InMemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Raw row access including soft-deleted users.
    pub fn raw(&self, id: UserId) -> Option<User> {
        self.users
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(&id)
            .cloned()
    }

    fn ensure_unique(
        users: &HashMap<UserId, User>,
        username: &str,
        email: &str,
        exclude: Option<UserId>,
    ) -> Result<(), StorageError> {
        let clash = users.values().find(|u| {
            !u.is_deleted()
                && Some(u.id) != exclude
                && (u.username == username || u.email == email)
        });
        match clash {
            Some(existing) if existing.username == username => Err(StorageError::Conflict {
                entity_type: EntityType::User,
                reason: format!("username '{}' already exists", username),
            }),
            Some(_) => Err(StorageError::Conflict {
                entity_type: EntityType::User,
                reason: format!("email '{}' already exists", email),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn user_insert(&self, new_user: NewUser) -> KeelResult<User> {
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        Self::ensure_unique(&users, &new_user.username, &new_user.email, None)?;
        let id = UserId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let user = new_user.into_user(id);
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn user_get(&self, id: UserId) -> KeelResult<Option<User>> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(users.get(&id).filter(|u| !u.is_deleted()).cloned())
    }

    async fn user_get_by_username(&self, username: &str) -> KeelResult<Option<User>> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(users
            .values()
            .find(|u| !u.is_deleted() && u.username == username)
            .cloned())
    }

    async fn user_save(&self, user: &User) -> KeelResult<User> {
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        match users.get(&user.id) {
            Some(existing) if !existing.is_deleted() => {}
            _ => return Err(not_found(user.id).into()),
        }
        Self::ensure_unique(&users, &user.username, &user.email, Some(user.id))?;
        let mut stored = user.clone();
        stored.updated_at = Utc::now();
        users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn user_soft_delete(&self, id: UserId) -> KeelResult<()> {
        let mut users = self.users.write().map_err(|_| StorageError::LockPoisoned)?;
        match users.get_mut(&id) {
            Some(user) if !user.is_deleted() => {
                user.deleted_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(not_found(id).into()),
        }
    }

    async fn user_query(&self, query: &UserQuery) -> KeelResult<(Vec<User>, u64)> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut matched: Vec<User> = users.values().filter(|u| query.matches(u)).cloned().collect();
        let total = matched.len() as u64;
        matched.sort_by(|a, b| query.compare(a, b));
        let page = matched
            .into_iter()
            .skip(usize::try_from(query.offset()).unwrap_or(usize::MAX))
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn user_count(&self) -> KeelResult<u64> {
        let users = self.users.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(users.values().filter(|u| !u.is_deleted()).count() as u64)
    }

    async fn ping(&self) -> KeelResult<()> {
        Ok(())
    }
}
