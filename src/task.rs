//! Task record and its lifecycle state machine
//!
//! ```text
//! Pending ──start──▶ Running ──complete──▶ Completed
//!    │                  ├──────fail──────▶ Failed
//!    └──────cancel──────┴─────cancel─────▶ Cancelled
//! ```
//!
//! Terminal states never transition again. Progress is only accepted while
//! `Running` and never decreases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{Correlation, TaskId, UserId};

/// Lifecycle state of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Admitted, waiting for a worker
    Pending,
    /// A worker is fetching the source
    Running,
    /// Artifact fetched and ready for delivery
    Completed,
    /// Fetch or post-fetch validation failed
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl TaskState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Why a task ended in [`TaskState::Failed`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The fetch operation reported an error (message kept verbatim for display)
    Fetch {
        /// Error message from the fetch operation
        message: String,
    },
    /// The fetched artifact is larger than the configured maximum
    SizeExceeded {
        /// Actual artifact size
        size_bytes: u64,
        /// Configured maximum
        limit_bytes: u64,
    },
    /// The fetch claimed success but the artifact does not exist
    OutputMissing {
        /// Path reported by the fetch operation
        path: PathBuf,
    },
    /// The fetch claimed success but the artifact is empty
    OutputEmpty {
        /// Path reported by the fetch operation
        path: PathBuf,
    },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Fetch { message } => write!(f, "{}", message),
            FailureReason::SizeExceeded {
                size_bytes,
                limit_bytes,
            } => write!(
                f,
                "file too large ({:.1}MB > {:.1}MB limit)",
                *size_bytes as f64 / (1024.0 * 1024.0),
                *limit_bytes as f64 / (1024.0 * 1024.0)
            ),
            FailureReason::OutputMissing { path } => {
                write!(f, "downloaded file not found: {}", path.display())
            }
            FailureReason::OutputEmpty { path } => {
                write!(f, "downloaded file is empty: {}", path.display())
            }
        }
    }
}

/// Media metadata reported by the fetch operation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MediaMetadata {
    /// Media title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Duration in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u64>,
    /// Uploader / channel name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    /// Total size estimate reported while fetching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_size_bytes: Option<u64>,
}

impl MediaMetadata {
    /// Overlay the fields present in `other`. Returns true if anything changed.
    pub fn merge(&mut self, other: MediaMetadata) -> bool {
        let before = self.clone();
        if other.title.is_some() {
            self.title = other.title;
        }
        if other.duration_secs.is_some() {
            self.duration_secs = other.duration_secs;
        }
        if other.uploader.is_some() {
            self.uploader = other.uploader;
        }
        if other.estimated_size_bytes.is_some() {
            self.estimated_size_bytes = other.estimated_size_bytes;
        }
        *self != before
    }
}

/// Rejected state transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("invalid task transition from {from} to {to}")]
pub struct TransitionError {
    /// State the task was in
    pub from: TaskState,
    /// State the caller tried to reach
    pub to: TaskState,
}

/// One requested fetch-and-deliver operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Task {
    /// Task ID
    pub id: TaskId,
    /// Requesting user and message
    pub correlation: Correlation,
    /// Source URL (validated before admission)
    pub source: String,
    /// Current lifecycle state
    pub state: TaskState,
    /// Progress percentage (0 to 100), frozen outside `Running`
    pub progress: u8,
    /// Media metadata, once reported by the fetch operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MediaMetadata>,
    /// Artifact location, set only on `Completed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_location: Option<PathBuf>,
    /// Failure reason, set only on `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// Whether the user asked for cancellation
    pub cancel_requested: bool,
    /// When the task was admitted
    pub created_at: DateTime<Utc>,
    /// When a worker started it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When it reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task in `Pending`
    pub fn new(id: TaskId, correlation: Correlation, source: impl Into<String>) -> Self {
        Self {
            id,
            correlation,
            source: source.into(),
            state: TaskState::Pending,
            progress: 0,
            metadata: None,
            result_location: None,
            failure_reason: None,
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// User that submitted the task
    pub fn user_id(&self) -> UserId {
        self.correlation.user_id
    }

    /// Whether the task reached a terminal state
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Worker-side start.
    ///
    /// `Pending → Running`, unless cancellation was already requested, in which
    /// case the task goes straight to `Cancelled` and the fetch must be skipped.
    /// Returns the state the task ended up in.
    pub fn start(&mut self) -> Result<TaskState, TransitionError> {
        if self.state != TaskState::Pending {
            return Err(TransitionError {
                from: self.state,
                to: TaskState::Running,
            });
        }

        if self.cancel_requested {
            self.finish(TaskState::Cancelled);
        } else {
            self.state = TaskState::Running;
            self.started_at = Some(Utc::now());
        }
        Ok(self.state)
    }

    /// Record a progress report. Returns true if the stored percent advanced.
    ///
    /// Ignored outside `Running`, clamped to `[0, 100]`, and never lowers the
    /// stored value.
    pub fn update_progress(&mut self, percent: f64) -> bool {
        if self.state != TaskState::Running || percent.is_nan() {
            return false;
        }

        let percent = percent.clamp(0.0, 100.0).floor() as u8;
        if percent > self.progress {
            self.progress = percent;
            true
        } else {
            false
        }
    }

    /// Overlay metadata reported by the fetch operation. Returns true on change.
    pub fn merge_metadata(&mut self, metadata: MediaMetadata) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.metadata.get_or_insert_with(Default::default).merge(metadata)
    }

    /// `Running → Completed`
    pub fn complete(&mut self, location: PathBuf) -> Result<(), TransitionError> {
        self.require_running(TaskState::Completed)?;
        self.progress = 100;
        self.result_location = Some(location);
        self.finish(TaskState::Completed);
        Ok(())
    }

    /// `Running → Failed`
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), TransitionError> {
        self.require_running(TaskState::Failed)?;
        self.failure_reason = Some(reason);
        self.finish(TaskState::Failed);
        Ok(())
    }

    /// Set the cancellation flag. Returns true if the flag was newly set.
    ///
    /// Only requests cancellation; the transition itself happens in
    /// [`Task::cancel`] (pending tasks) or cooperatively on the worker.
    pub fn request_cancel(&mut self) -> bool {
        if self.is_terminal() || self.cancel_requested {
            return false;
        }
        self.cancel_requested = true;
        true
    }

    /// `Pending | Running → Cancelled`
    pub fn cancel(&mut self) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError {
                from: self.state,
                to: TaskState::Cancelled,
            });
        }
        self.cancel_requested = true;
        self.finish(TaskState::Cancelled);
        Ok(())
    }

    fn require_running(&self, to: TaskState) -> Result<(), TransitionError> {
        if self.state == TaskState::Running {
            Ok(())
        } else {
            Err(TransitionError {
                from: self.state,
                to,
            })
        }
    }

    fn finish(&mut self, state: TaskState) {
        self.state = state;
        self.finished_at = Some(Utc::now());
    }
}
