//! Task handlers.

use super::{SubmitTaskRequest, SubmitTaskResponse};
use crate::api::AppState;
use crate::error::Error;
use crate::types::TaskId;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// POST /tasks - Admit a new task
#[utoipa::path(
    post,
    path = "/tasks",
    tag = "tasks",
    request_body = SubmitTaskRequest,
    responses(
        (status = 201, description = "Task admitted", body = SubmitTaskResponse),
        (status = 400, description = "Source rejected", body = crate::error::ApiError),
        (status = 429, description = "Per-user rate limit reached", body = crate::error::ApiError),
        (status = 503, description = "Scheduler is shutting down", body = crate::error::ApiError)
    )
)]
pub async fn submit_task(
    State(state): State<AppState>,
    Json(request): Json<SubmitTaskRequest>,
) -> Response {
    match state
        .scheduler
        .submit(request.user_id, &request.url, request.message_id)
        .await
    {
        Ok(id) => (StatusCode::CREATED, Json(SubmitTaskResponse { id })).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /tasks/:id - Current snapshot of a task
#[utoipa::path(
    get,
    path = "/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = u64, Path, description = "Task ID")
    ),
    responses(
        (status = 200, description = "Task snapshot", body = crate::task::Task),
        (status = 404, description = "Unknown task", body = crate::error::ApiError)
    )
)]
pub async fn get_task(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let id = TaskId(id);
    match state.scheduler.task(id).await {
        Some(task) => Json(task).into_response(),
        None => Error::NotFound(id).into_response(),
    }
}

/// DELETE /tasks/:id - Cancel a task
#[utoipa::path(
    delete,
    path = "/tasks/{id}",
    tag = "tasks",
    params(
        ("id" = u64, Path, description = "Task ID")
    ),
    responses(
        (status = 204, description = "Cancelled, or cancellation requested"),
        (status = 404, description = "Task is not in flight", body = crate::error::ApiError),
        (status = 409, description = "Task already finished", body = crate::error::ApiError)
    )
)]
pub async fn cancel_task(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.scheduler.cancel(TaskId(id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}
