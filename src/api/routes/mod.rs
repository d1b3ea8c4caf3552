//! Route handlers for the REST API
//!
//! Handlers are organized by domain:
//! - [`tasks`] - Task submission, lookup and cancellation
//! - [`users`] - Per-user status, task listing and bulk cancellation
//! - [`system`] - Queue stats, health, events, OpenAPI

use crate::types::{TaskId, UserId};
use serde::{Deserialize, Serialize};

mod system;
mod tasks;
mod users;

pub use system::*;
pub use tasks::*;
pub use users::*;

/// Request body for POST /tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitTaskRequest {
    /// Requesting user
    pub user_id: UserId,
    /// Source URL to fetch
    pub url: String,
    /// Transport message that carried the request
    #[serde(default)]
    pub message_id: i64,
}

/// Response body for POST /tasks
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct SubmitTaskResponse {
    /// ID of the admitted task
    pub id: TaskId,
}

/// Response body for POST /users/:user_id/cancel
#[derive(Debug, Deserialize, Serialize, utoipa::ToSchema)]
pub struct CancelAllResponse {
    /// Tasks that were cancelled or asked to stop
    pub cancelled: usize,
}
