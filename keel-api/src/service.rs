//! User operations as the HTTP layer sees them.
//!
//! Each mutation runs in a fixed order: the repository writes the store and
//! then the cache, and only after it returns is the domain event queued. A
//! failed or skipped publish is logged and never undoes the mutation.

use keel_core::{KeelError, NewUser, PasswordHasher, User, UserId, UserPatch, UserQuery};
use keel_events::{EventPublisher, PublishError};
use keel_storage::CachedUserRepository;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::telemetry::{SpanHandle, SpanManager, SpanStatus};
use crate::types::{CreateUserRequest, UserResponse};
use keel_core::PaginationWindow;

/// User service with injected repository, publisher and hasher.
#[derive(Clone)]
pub struct UserService {
    repo: CachedUserRepository,
    events: EventPublisher,
    hasher: Arc<dyn PasswordHasher>,
}

impl UserService {
    pub fn new(
        repo: CachedUserRepository,
        events: EventPublisher,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            repo,
            events,
            hasher,
        }
    }

    pub fn repository(&self) -> &CachedUserRepository {
        &self.repo
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub async fn create(
        &self,
        request: CreateUserRequest,
        parent: Option<&SpanHandle>,
    ) -> ApiResult<User> {
        let span = SpanManager::start_span(parent, "user.create", "Create new user");
        span.set_tag("username", request.username.clone());

        let new_user = NewUser {
            password_hash: self.hasher.hash(&request.password),
            username: request.username,
            email: request.email,
            first_name: request.first_name,
            last_name: request.last_name,
        };
        let user = self
            .repo
            .create(new_user)
            .await
            .map_err(|err| failed(&span, "create_user", err, "Failed to create user"))?;
        span.finish(SpanStatus::Ok);

        tracing::info!(user_id = %user.id, "User created successfully");
        self.emit_user_event("created", user.id, &UserResponse::from(&user));
        Ok(user)
    }

    pub async fn get(&self, id: UserId, parent: Option<&SpanHandle>) -> ApiResult<User> {
        let span = SpanManager::start_span(parent, "user.get_by_id", "Get user by ID");
        span.set_tag("user_id", id.to_string());
        let user = self
            .repo
            .get(id)
            .await
            .map_err(|err| failed(&span, "get_user_by_id", err, "Failed to retrieve user"))?;
        span.finish(SpanStatus::Ok);
        Ok(user)
    }

    pub async fn get_by_username(
        &self,
        username: &str,
        parent: Option<&SpanHandle>,
    ) -> ApiResult<User> {
        if username.trim().is_empty() {
            return Err(ApiError::bad_request("Username parameter is required"));
        }
        let span = SpanManager::start_span(parent, "user.get_by_username", "Get user by username");
        let user = self.repo.get_by_username(username).await.map_err(|err| {
            failed(&span, "get_user_by_username", err, "Failed to retrieve user")
        })?;
        span.finish(SpanStatus::Ok);
        Ok(user)
    }

    pub async fn list(
        &self,
        query: &UserQuery,
        parent: Option<&SpanHandle>,
    ) -> ApiResult<(Vec<User>, PaginationWindow)> {
        let span = SpanManager::start_span(parent, "user.get_all", "Get all users with search");
        span.set_tag("page", query.page.to_string());
        span.set_tag("limit", query.limit.to_string());
        let page = self
            .repo
            .list(query)
            .await
            .map_err(|err| failed(&span, "get_all_users", err, "Failed to retrieve users"))?;
        span.finish(SpanStatus::Ok);
        Ok(page)
    }

    pub async fn update(
        &self,
        id: UserId,
        patch: &UserPatch,
        parent: Option<&SpanHandle>,
    ) -> ApiResult<User> {
        let span = SpanManager::start_span(parent, "user.update", "Update user");
        span.set_tag("user_id", id.to_string());
        let user = self
            .repo
            .update(id, patch)
            .await
            .map_err(|err| failed(&span, "update_user", err, "Failed to update user"))?;
        span.finish(SpanStatus::Ok);

        tracing::info!(user_id = %user.id, "User updated successfully");
        self.emit_user_event("updated", user.id, &UserResponse::from(&user));
        Ok(user)
    }

    pub async fn delete(&self, id: UserId, parent: Option<&SpanHandle>) -> ApiResult<()> {
        let span = SpanManager::start_span(parent, "user.delete", "Delete user");
        span.set_tag("user_id", id.to_string());
        self.repo
            .delete(id)
            .await
            .map_err(|err| failed(&span, "delete_user", err, "Failed to delete user"))?;
        span.finish(SpanStatus::Ok);

        tracing::info!(user_id = %id, "User deleted successfully");
        self.emit_user_event("deleted", id, &json!({ "id": id }));
        Ok(())
    }

    fn emit_user_event<T: Serialize + ?Sized>(&self, event_type: &str, id: UserId, data: &T) {
        let result = self.events.publish_user_event(event_type, id.as_i64(), data);
        log_publish_outcome(event_type, result);
    }
}

/// Log a publish result. Never propagated.
pub(crate) fn log_publish_outcome(event_type: &str, result: Result<(), PublishError>) {
    match result {
        Ok(()) => {}
        Err(PublishError::Disabled) => {
            tracing::debug!(event_type = event_type, "Event publishing disabled, skipping event");
        }
        Err(err) => {
            tracing::warn!(event_type = event_type, error = %err, "Failed to publish event");
        }
    }
}

fn failed(span: &SpanHandle, operation: &str, err: KeelError, action: &str) -> ApiError {
    if err.is_not_found() {
        span.finish(SpanStatus::NotFound);
    } else {
        span.finish(SpanStatus::InternalError);
        tracing::error!(operation = operation, error = %err, "{}", action);
    }
    ApiError::from_store(err, action)
}
