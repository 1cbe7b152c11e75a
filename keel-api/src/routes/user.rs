//! User REST API Routes
//!
//! CRUD over `/v1/users`. Handlers translate HTTP into [`UserService`]
//! calls; ordering and event emission live in the service.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{get, post},
    Extension, Json, Router,
};
use keel_core::UserPatch;

use crate::envelope::ApiResponse;
use crate::error::{ApiError, ApiResult, ValidationIssue};
use crate::service::UserService;
use crate::state::AppState;
use crate::telemetry::SpanHandle;
use crate::types::{
    parse_user_id, CreateUserRequest, ListUsersParams, UpdateUserRequest, UserResponse,
};
use crate::validation::Validate;

// ============================================================================
// EXTRACTION HELPERS
// ============================================================================

/// Unparseable bodies are reported as a single `request` validation issue.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    match payload {
        Ok(Json(value)) => Ok(value),
        Err(rejection) => {
            tracing::warn!(error = %rejection.body_text(), "Invalid request body");
            Err(ApiError::validation(vec![ValidationIssue::new(
                "request",
                "Invalid request format",
            )
            .with_value(rejection.body_text())]))
        }
    }
}

fn parent(span: &Option<Extension<SpanHandle>>) -> Option<&SpanHandle> {
    span.as_ref().map(|Extension(handle)| handle)
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /v1/users
pub async fn create_user(
    State(users): State<UserService>,
    span: Option<Extension<SpanHandle>>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<UserResponse>> {
    let request = body(payload)?;
    request.validate()?;
    let user = users.create(request, parent(&span)).await?;
    Ok(ApiResponse::created("User created successfully", UserResponse::from(&user)))
}

/// GET /v1/users
pub async fn list_users(
    State(users): State<UserService>,
    span: Option<Extension<SpanHandle>>,
    params: Result<Query<ListUsersParams>, QueryRejection>,
) -> ApiResult<ApiResponse<Vec<UserResponse>>> {
    let Query(params) = params.map_err(|_| ApiError::bad_request("Invalid query parameters"))?;
    let query = params.into_query()?;
    let (page, window) = users.list(&query, parent(&span)).await?;
    let data = page.iter().map(UserResponse::from).collect();
    Ok(ApiResponse::paginated("Users retrieved successfully", data, window))
}

/// GET /v1/users/{id}
pub async fn get_user(
    State(users): State<UserService>,
    span: Option<Extension<SpanHandle>>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<UserResponse>> {
    let id = parse_user_id(&id)?;
    let user = users.get(id, parent(&span)).await?;
    Ok(ApiResponse::ok("User retrieved successfully", UserResponse::from(&user)))
}

/// GET /v1/users/username/{username}
pub async fn get_user_by_username(
    State(users): State<UserService>,
    span: Option<Extension<SpanHandle>>,
    Path(username): Path<String>,
) -> ApiResult<ApiResponse<UserResponse>> {
    let user = users.get_by_username(&username, parent(&span)).await?;
    Ok(ApiResponse::ok("User retrieved successfully", UserResponse::from(&user)))
}

/// PUT /v1/users/{id}
pub async fn update_user(
    State(users): State<UserService>,
    span: Option<Extension<SpanHandle>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<ApiResponse<UserResponse>> {
    let id = parse_user_id(&id)?;
    let request = body(payload)?;
    request.validate()?;
    let patch = UserPatch::from(request);
    let user = users.update(id, &patch, parent(&span)).await?;
    Ok(ApiResponse::ok("User updated successfully", UserResponse::from(&user)))
}

/// DELETE /v1/users/{id}
pub async fn delete_user(
    State(users): State<UserService>,
    span: Option<Extension<SpanHandle>>,
    Path(id): Path<String>,
) -> ApiResult<ApiResponse<()>> {
    let id = parse_user_id(&id)?;
    users.delete(id, parent(&span)).await?;
    Ok(ApiResponse::message("User deleted successfully"))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/v1/users", post(create_user).get(list_users))
        .route(
            "/v1/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/v1/users/username/:username", get(get_user_by_username))
}
