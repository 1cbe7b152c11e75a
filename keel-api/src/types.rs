//! Request and response bodies for the user routes.

use chrono::{DateTime, Utc};
use keel_core::{SortField, User, UserId, UserPatch, UserQuery};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// Body of `POST /v1/users`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

/// Body of `PUT /v1/users/{id}`. Empty strings leave the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl From<UpdateUserRequest> for UserPatch {
    fn from(req: UpdateUserRequest) -> Self {
        fn keep(value: String) -> Option<String> {
            (!value.is_empty()).then_some(value)
        }
        UserPatch {
            username: keep(req.username),
            email: keep(req.email),
            first_name: keep(req.first_name),
            last_name: keep(req.last_name),
            is_active: req.is_active,
        }
    }
}

/// Query string of `GET /v1/users`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUsersParams {
    pub query: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_desc: Option<bool>,
    pub is_active: Option<bool>,
}

impl ListUsersParams {
    /// Apply defaults and bounds. Only an unknown sort field is rejected.
    pub fn into_query(self) -> ApiResult<UserQuery> {
        let sort_by = match self.sort_by.as_deref().filter(|s| !s.is_empty()) {
            Some(name) => name
                .parse::<SortField>()
                .map_err(|_| ApiError::bad_request("Invalid query parameters"))?,
            None => SortField::default(),
        };

        let mut query = UserQuery::default()
            .with_page(self.page.unwrap_or(1))
            .with_limit(self.limit.unwrap_or(0))
            .with_sort(sort_by, self.sort_desc.unwrap_or(false))
            .with_active(self.is_active);
        if let Some(search) = self.query {
            query = query.with_search(search);
        }
        Ok(query)
    }
}

/// Client-facing user. Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self::from(&user)
    }
}

/// Parse a `{id}` path segment. Ids are positive 32-bit integers.
pub fn parse_user_id(raw: &str) -> ApiResult<UserId> {
    raw.parse::<u32>()
        .map(|id| UserId(i64::from(id)))
        .map_err(|_| ApiError::bad_request("Invalid user ID format"))
}
