//! Per-user handlers.

use super::CancelAllResponse;
use crate::api::AppState;
use crate::types::UserId;
use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

/// GET /users/:user_id/status - Queue position and remaining budget of a user
#[utoipa::path(
    get,
    path = "/users/{user_id}/status",
    tag = "users",
    params(
        ("user_id" = i64, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "User status", body = crate::types::UserStatus)
    )
)]
pub async fn user_status(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> impl IntoResponse {
    Json(state.scheduler.status(user_id).await)
}

/// GET /users/:user_id/tasks - In-flight tasks of a user, oldest first
#[utoipa::path(
    get,
    path = "/users/{user_id}/tasks",
    tag = "users",
    params(
        ("user_id" = i64, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "In-flight tasks", body = Vec<crate::task::Task>)
    )
)]
pub async fn user_tasks(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> impl IntoResponse {
    Json(state.scheduler.user_tasks(user_id).await)
}

/// POST /users/:user_id/cancel - Cancel every in-flight task of a user
#[utoipa::path(
    post,
    path = "/users/{user_id}/cancel",
    tag = "users",
    params(
        ("user_id" = i64, Path, description = "User ID")
    ),
    responses(
        (status = 200, description = "Number of tasks affected", body = CancelAllResponse)
    )
)]
pub async fn cancel_user_tasks(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> impl IntoResponse {
    let cancelled = state.scheduler.cancel_all(user_id).await;
    tracing::info!(user_id, cancelled, "cancel-all requested over HTTP");
    Json(CancelAllResponse { cancelled })
}
