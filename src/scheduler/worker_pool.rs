//! Worker pool: a fixed set of loops that claim pending tasks and run the fetcher.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast;

use super::{Completion, Scheduler, TaskCell};
use crate::error::FetchError;
use crate::fetch::{FetchOutput, FetchRequest, HookAction, ProgressHook, ProgressUpdate};
use crate::task::{FailureReason, TaskState};
use crate::types::{Event, TaskId};

/// How a fetch attempt ended, before it is applied to the task
pub(super) enum Outcome {
    Completed { path: PathBuf, size_bytes: u64 },
    Failed(FailureReason),
    Cancelled,
}

/// What recording an outcome did to the task
pub(super) enum Applied {
    Recorded {
        state: TaskState,
        size_bytes: Option<u64>,
    },
    /// Cancellation was requested; any artifact must be deleted
    Discarded { artifact: Option<PathBuf> },
}

/// Progress hook handed to the fetcher for one task
///
/// Records progress and metadata on the task, emits `Progress` events when the
/// integer percent advances or metadata changes, and answers `Abort` once
/// cancellation has been requested.
struct TaskProgressHook<'a> {
    id: TaskId,
    cell: &'a TaskCell,
    event_tx: &'a broadcast::Sender<Event>,
}

impl ProgressHook for TaskProgressHook<'_> {
    fn report(&self, update: ProgressUpdate) -> HookAction {
        let mut advanced = false;
        let mut metadata_changed = false;
        self.cell.state.send_if_modified(|task| {
            if let Some(metadata) = update.metadata {
                metadata_changed = task.merge_metadata(metadata);
            }
            if let Some(percent) = update.percent {
                advanced = task.update_progress(percent);
            }
            advanced || metadata_changed
        });

        if advanced || metadata_changed {
            let task = self.cell.state.borrow();
            let _ = self.event_tx.send(Event::Progress {
                id: self.id,
                percent: task.progress,
                metadata: if metadata_changed {
                    task.metadata.clone()
                } else {
                    None
                },
            });
        }

        if self.cell.cancel.is_cancelled() {
            HookAction::Abort
        } else {
            HookAction::Continue
        }
    }
}

impl Scheduler {
    /// Spawn `max_concurrent_downloads` worker loops
    ///
    /// Each worker runs at most one task at a time, so the number of
    /// concurrently running fetches never exceeds the pool size.
    pub(crate) fn spawn_workers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.download.max_concurrent_downloads)
            .map(|worker_id| {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.run_worker(worker_id).await })
            })
            .collect()
    }

    async fn run_worker(self, worker_id: usize) {
        tracing::debug!(worker_id, "Worker started");

        while let Some((id, cell)) = self.next_pending().await {
            let completion = self.execute(worker_id, id, &cell).await;
            drop(cell);
            if self.runtime.completion_tx.send(completion).is_err() {
                tracing::warn!(task_id = id.0, "Completion coordinator is gone");
            }
        }

        tracing::debug!(worker_id, "Worker stopped");
    }

    /// Wait for the oldest pending task, or `None` on shutdown
    async fn next_pending(&self) -> Option<(TaskId, Arc<TaskCell>)> {
        loop {
            let notified = self.queue_state.work_available.notified();
            tokio::pin!(notified);
            // Register interest before checking so a notify between the check
            // and the await is not lost
            notified.as_mut().enable();

            if self.runtime.shutdown.is_cancelled() {
                return None;
            }

            {
                let mut inner = self.queue_state.inner.lock().await;
                while let Some(id) = inner.pending.pop_front() {
                    if let Some(cell) = inner.tasks.get(&id) {
                        return Some((id, Arc::clone(cell)));
                    }
                }
            }

            tokio::select! {
                _ = self.runtime.shutdown.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Drive one claimed task to a terminal state
    async fn execute(&self, worker_id: usize, id: TaskId, cell: &TaskCell) -> Completion {
        let mut started = Ok(TaskState::Pending);
        cell.state.send_if_modified(|task| {
            started = task.start();
            started.is_ok()
        });

        match started {
            Ok(TaskState::Running) => {}
            Ok(_) => {
                tracing::info!(task_id = id.0, "Task cancelled before start");
                return Completion::Finished {
                    id,
                    work_dir: None,
                    size_bytes: None,
                };
            }
            Err(e) => {
                tracing::warn!(task_id = id.0, error = %e, "Claimed task could not start");
                return Completion::Finished {
                    id,
                    work_dir: None,
                    size_bytes: None,
                };
            }
        }

        let source = cell.state.borrow().source.clone();
        tracing::info!(task_id = id.0, worker_id, source = %source, "Task started");
        self.emit_event(Event::Started { id, worker_id });

        let work_dir = self.work_dir(id);
        let outcome = match tokio::fs::create_dir_all(&work_dir).await {
            Ok(()) => self.run_fetch(id, source, &work_dir, cell).await,
            Err(e) => Outcome::Failed(FailureReason::Fetch {
                message: format!("failed to create working directory: {}", e),
            }),
        };

        let (state, size_bytes) = match self.apply_outcome(id, cell, outcome) {
            Applied::Recorded {
                state,
                size_bytes,
            } => (state, size_bytes),
            Applied::Discarded { artifact } => {
                if let Some(path) = artifact {
                    remove_file(&path).await;
                }
                (TaskState::Cancelled, None)
            }
        };

        if state == TaskState::Cancelled {
            remove_dir(&work_dir).await;
        }

        Completion::Finished {
            id,
            work_dir: Some(work_dir),
            size_bytes,
        }
    }

    async fn run_fetch(
        &self,
        id: TaskId,
        source: String,
        work_dir: &Path,
        cell: &TaskCell,
    ) -> Outcome {
        let limit = self.config.download.max_output_size_bytes;
        let request = FetchRequest {
            task_id: id,
            source,
            output_dir: work_dir.to_path_buf(),
            max_output_size_bytes: limit,
        };
        let hook = TaskProgressHook {
            id,
            cell,
            event_tx: &self.event_tx,
        };

        let result = AssertUnwindSafe(self.fetcher.fetch(&request, &hook))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(output)) => {
                let metadata = output.metadata.clone();
                cell.state
                    .send_if_modified(|task| task.merge_metadata(metadata));
                verify_output(output, limit).await
            }
            Ok(Err(FetchError::Aborted)) if cell.cancel.is_cancelled() => Outcome::Cancelled,
            Ok(Err(e)) => {
                tracing::warn!(
                    task_id = id.0,
                    fetcher = self.fetcher.name(),
                    error = %e,
                    "Fetch failed"
                );
                Outcome::Failed(FailureReason::Fetch {
                    message: e.to_string(),
                })
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    task_id = id.0,
                    fetcher = self.fetcher.name(),
                    panic = %message,
                    "Fetcher panicked"
                );
                Outcome::Failed(FailureReason::Fetch {
                    message: format!("fetch panicked: {}", message),
                })
            }
        }
    }

    /// Record the outcome on the task
    ///
    /// The cancellation check and the transition happen in one watch update, so
    /// a cancel landing after the fetch returned still wins and the artifact is
    /// handed back for deletion instead of being delivered.
    pub(super) fn apply_outcome(&self, id: TaskId, cell: &TaskCell, outcome: Outcome) -> Applied {
        let mut result = Ok(());
        let mut applied = Applied::Recorded {
            state: TaskState::Running,
            size_bytes: None,
        };
        cell.state.send_if_modified(|task| {
            if task.cancel_requested || cell.cancel.is_cancelled() {
                let artifact = match outcome {
                    Outcome::Completed { path, .. } => Some(path),
                    _ => None,
                };
                result = task.cancel();
                applied = Applied::Discarded { artifact };
            } else {
                let size_bytes = match &outcome {
                    Outcome::Completed { size_bytes, .. } => Some(*size_bytes),
                    _ => None,
                };
                result = match outcome {
                    Outcome::Completed { path, .. } => task.complete(path),
                    Outcome::Failed(reason) => task.fail(reason),
                    Outcome::Cancelled => task.cancel(),
                };
                applied = Applied::Recorded {
                    state: task.state,
                    size_bytes,
                };
            }
            result.is_ok()
        });

        match &result {
            Ok(()) => {
                let task = cell.state.borrow();
                tracing::info!(task_id = id.0, state = %task.state, "Task finished");
            }
            Err(e) => tracing::error!(task_id = id.0, error = %e, "Failed to record task outcome"),
        }
        applied
    }
}

/// Check the artifact a fetch reported: it must exist, be non-empty and fit the limit
///
/// Oversize and empty artifacts are deleted.
async fn verify_output(output: FetchOutput, limit: u64) -> Outcome {
    let path = output.path;
    let size_bytes = match tokio::fs::metadata(&path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Outcome::Failed(FailureReason::OutputMissing { path }),
    };

    if size_bytes == 0 {
        remove_file(&path).await;
        return Outcome::Failed(FailureReason::OutputEmpty { path });
    }

    if size_bytes > limit {
        tracing::info!(
            path = %path.display(),
            size_bytes,
            limit_bytes = limit,
            "Artifact exceeds size limit"
        );
        remove_file(&path).await;
        return Outcome::Failed(FailureReason::SizeExceeded {
            size_bytes,
            limit_bytes: limit,
        });
    }

    Outcome::Completed { path, size_bytes }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to delete artifact"),
    }
}

/// Delete a task working directory; a missing directory is fine
pub(crate) async fn remove_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete working directory")
        }
    }
}
