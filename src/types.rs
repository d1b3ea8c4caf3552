//! Core types for shorts-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

use crate::task::MediaMetadata;

/// Identifier of the requesting user (chat user id on the transport side)
pub type UserId = i64;

/// Unique identifier for a task
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Correlation data tying a task back to the message that requested it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Correlation {
    /// Requesting user
    pub user_id: UserId,
    /// Transport message that carried the request (0 when unknown)
    #[serde(default)]
    pub message_id: i64,
}

impl Correlation {
    /// Create a correlation for a user/message pair
    pub fn new(user_id: UserId, message_id: i64) -> Self {
        Self {
            user_id,
            message_id,
        }
    }
}

/// Event emitted during the task lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task admitted and appended to the pending queue
    Queued {
        /// Task ID
        id: TaskId,
        /// Requesting user
        user_id: UserId,
        /// Source URL
        source: String,
    },

    /// A worker picked the task up and started fetching
    Started {
        /// Task ID
        id: TaskId,
        /// Index of the worker running the task
        worker_id: usize,
    },

    /// Fetch progress update (only emitted when the integer percent advances)
    Progress {
        /// Task ID
        id: TaskId,
        /// Progress percentage (0 to 100)
        percent: u8,
        /// Media metadata, once the fetch operation has reported it
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<MediaMetadata>,
    },

    /// Fetch finished and the artifact passed size checks
    Completed {
        /// Task ID
        id: TaskId,
        /// Local artifact path, owned by the delivery path from now on
        path: PathBuf,
        /// Artifact size in bytes
        size_bytes: u64,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Human-readable failure reason
        reason: String,
    },

    /// Task cancelled by its user
    Cancelled {
        /// Task ID
        id: TaskId,
    },

    /// Delivery path returned successfully
    Delivered {
        /// Task ID
        id: TaskId,
    },

    /// Delivery path returned an error (the artifact is still deleted)
    DeliveryFailed {
        /// Task ID
        id: TaskId,
        /// Error reported by the delivery path
        error: String,
    },

    /// Scheduler is shutting down
    Shutdown,
}

impl Event {
    /// Short event name, used as the SSE event type
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Queued { .. } => "queued",
            Event::Started { .. } => "started",
            Event::Progress { .. } => "progress",
            Event::Completed { .. } => "completed",
            Event::Failed { .. } => "failed",
            Event::Cancelled { .. } => "cancelled",
            Event::Delivered { .. } => "delivered",
            Event::DeliveryFailed { .. } => "delivery_failed",
            Event::Shutdown => "shutdown",
        }
    }
}

/// Per-user status snapshot returned by `Scheduler::status`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserStatus {
    /// The user's tasks waiting for a worker
    pub queued: usize,
    /// The user's tasks currently being fetched
    pub active: usize,
    /// Submissions the user may still make in the current rate window
    pub remaining_requests: usize,
    /// Pending tasks across all users
    pub pending_total: usize,
    /// Running tasks across all users
    pub running_total: usize,
    /// Configured worker pool size
    pub max_concurrent: usize,
}

/// Queue-wide statistics
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct QueueStats {
    /// Tasks waiting for a worker
    pub pending: usize,
    /// Tasks currently being fetched
    pub running: usize,
    /// Distinct users with in-flight tasks
    pub users: usize,
    /// Configured worker pool size
    pub max_concurrent: usize,
    /// Whether new submissions are accepted
    pub accepting_new: bool,
}
