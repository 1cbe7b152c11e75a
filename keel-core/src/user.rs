//! User entity and the request shapes that operate on it.

use crate::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Store-assigned numeric user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(UserId)
    }
}

/// A user as held by the system of record.
///
/// This is the shape written to the cache, so it carries the password hash.
/// Anything facing a client must go through a response type that drops it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl User {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Attributes for a user that does not exist yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
}

impl NewUser {
    /// Materialize with a store-assigned id. New users start active.
    pub fn into_user(self, id: UserId) -> User {
        let now = Utc::now();
        User {
            id,
            username: self.username,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Partial update. An empty string leaves the attribute unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        fn blank(field: &Option<String>) -> bool {
            field.as_deref().map_or(true, str::is_empty)
        }
        blank(&self.username)
            && blank(&self.email)
            && blank(&self.first_name)
            && blank(&self.last_name)
            && self.is_active.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        fn set(target: &mut String, value: &Option<String>) {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                *target = value.to_string();
            }
        }
        set(&mut user.username, &self.username);
        set(&mut user.email, &self.email);
        set(&mut user.first_name, &self.first_name);
        set(&mut user.last_name, &self.last_name);
        if let Some(active) = self.is_active {
            user.is_active = active;
        }
    }
}

// ============================================================================
// LIST QUERY
// ============================================================================

/// Sortable user attributes, named as clients send them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Username,
    Email,
    FirstName,
    LastName,
    IsActive,
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortField {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortField::Username => "username",
            SortField::Email => "email",
            SortField::FirstName => "firstName",
            SortField::LastName => "lastName",
            SortField::IsActive => "isActive",
            SortField::CreatedAt => "createdAt",
            SortField::UpdatedAt => "updatedAt",
        }
    }

    fn compare(&self, a: &User, b: &User) -> Ordering {
        match self {
            SortField::Username => a.username.cmp(&b.username),
            SortField::Email => a.email.cmp(&b.email),
            SortField::FirstName => a.first_name.cmp(&b.first_name),
            SortField::LastName => a.last_name.cmp(&b.last_name),
            SortField::IsActive => a.is_active.cmp(&b.is_active),
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "username" => Ok(SortField::Username),
            "email" => Ok(SortField::Email),
            "firstName" => Ok(SortField::FirstName),
            "lastName" => Ok(SortField::LastName),
            "isActive" => Ok(SortField::IsActive),
            "createdAt" => Ok(SortField::CreatedAt),
            "updatedAt" => Ok(SortField::UpdatedAt),
            other => Err(format!("unsupported sort field: {}", other)),
        }
    }
}

/// Filter, sort and window for listing users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserQuery {
    pub search: Option<String>,
    pub page: u32,
    pub limit: u32,
    pub sort_by: SortField,
    pub sort_desc: bool,
    pub is_active: Option<bool>,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            search: None,
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            sort_by: SortField::default(),
            sort_desc: false,
            is_active: None,
        }
    }
}

impl UserQuery {
    /// Non-positive pages fall back to the first page.
    pub fn with_page(mut self, page: i64) -> Self {
        self.page = if page <= 0 {
            1
        } else {
            u32::try_from(page).unwrap_or(u32::MAX)
        };
        self
    }

    /// Non-positive limits fall back to the default; large ones are capped.
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = if limit <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            limit.min(i64::from(MAX_PAGE_SIZE)) as u32
        };
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = (!search.trim().is_empty()).then_some(search);
        self
    }

    pub fn with_sort(mut self, field: SortField, desc: bool) -> Self {
        self.sort_by = field;
        self.sort_desc = desc;
        self
    }

    pub fn with_active(mut self, is_active: Option<bool>) -> Self {
        self.is_active = is_active;
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Case-insensitive substring search over the name and email attributes,
    /// plus the optional active filter. Soft-deleted users never match.
    pub fn matches(&self, user: &User) -> bool {
        if user.is_deleted() {
            return false;
        }
        if let Some(active) = self.is_active {
            if user.is_active != active {
                return false;
            }
        }
        match &self.search {
            None => true,
            Some(term) => {
                let term = term.to_lowercase();
                [&user.username, &user.email, &user.first_name, &user.last_name]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&term))
            }
        }
    }

    /// Ordering for the configured sort, ties broken by id for stable pages.
    pub fn compare(&self, a: &User, b: &User) -> Ordering {
        let ordering = self.sort_by.compare(a, b).then_with(|| a.id.cmp(&b.id));
        if self.sort_desc {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, username: &str) -> User {
        NewUser {
            username: username.into(),
            email: format!("{}@example.com", username),
            password_hash: "salt$digest".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
        }
        .into_user(UserId(id))
    }

    #[test]
    fn new_users_start_active() {
        let u = user(1, "ada");
        assert!(u.is_active);
        assert!(!u.is_deleted());
        assert_eq!(u.created_at, u.updated_at);
    }

    #[test]
    fn empty_strings_in_patch_leave_fields_alone() {
        let mut u = user(1, "ada");
        let patch = UserPatch {
            username: Some(String::new()),
            email: Some("new@example.com".into()),
            is_active: Some(false),
            ..Default::default()
        };
        patch.apply(&mut u);
        assert_eq!(u.username, "ada");
        assert_eq!(u.email, "new@example.com");
        assert!(!u.is_active);
    }

    #[test]
    fn patch_emptiness() {
        assert!(UserPatch::default().is_empty());
        assert!(UserPatch {
            first_name: Some(String::new()),
            ..Default::default()
        }
        .is_empty());
        assert!(!UserPatch {
            is_active: Some(true),
            ..Default::default()
        }
        .is_empty());
    }

    #[test]
    fn query_defaults_and_clamps() {
        let q = UserQuery::default().with_page(-3).with_limit(0);
        assert_eq!((q.page, q.limit), (1, DEFAULT_PAGE_SIZE));
        let q = UserQuery::default().with_page(4).with_limit(1000);
        assert_eq!((q.page, q.limit), (4, MAX_PAGE_SIZE));
        assert_eq!(q.offset(), 300);
    }

    #[test]
    fn search_is_case_insensitive_across_fields() {
        let u = user(1, "ada");
        assert!(UserQuery::default().with_search("LOVE").matches(&u));
        assert!(UserQuery::default().with_search("EXAMPLE.com").matches(&u));
        assert!(!UserQuery::default().with_search("grace").matches(&u));
        assert!(!UserQuery::default().with_active(Some(false)).matches(&u));
    }

    #[test]
    fn deleted_users_never_match() {
        let mut u = user(1, "ada");
        u.deleted_at = Some(Utc::now());
        assert!(!UserQuery::default().matches(&u));
    }

    #[test]
    fn sort_field_parses_client_names() {
        assert_eq!("firstName".parse::<SortField>(), Ok(SortField::FirstName));
        assert!("password".parse::<SortField>().is_err());
    }

    #[test]
    fn descending_sort_reverses_order() {
        let a = user(1, "alpha");
        let b = user(2, "beta");
        let q = UserQuery::default().with_sort(SortField::Username, true);
        assert_eq!(q.compare(&a, &b), Ordering::Greater);
    }
}
