//! Cancellation of single tasks, of a user's tasks, and of everything on shutdown.

use super::{Completion, QueueInner, Scheduler};
use crate::error::{Error, Result};
use crate::task::{Task, TaskState, TransitionError};
use crate::types::{Event, TaskId, UserId};

/// What a cancellation request did to one task
enum CancelOutcome {
    /// The task was still pending: it is now `Cancelled` and retired
    Retired(Task),
    /// The task is running: its worker will stop at the next checkpoint
    Requested,
    /// Cancellation was already requested, or the task already finished
    Unchanged(TaskState),
}

impl Scheduler {
    /// Cancel every in-flight task of a user
    ///
    /// Pending tasks are removed from the queue and end `Cancelled`
    /// immediately; they never reach `Running`. Running tasks get their
    /// cancellation flag set and stop at the fetcher's next progress
    /// checkpoint.
    ///
    /// Returns the number of tasks this call cancelled or asked to cancel.
    pub async fn cancel_all(&self, user_id: UserId) -> usize {
        let outcomes = {
            let mut inner = self.queue_state.inner.lock().await;
            let ids: Vec<TaskId> = inner
                .in_flight
                .get(&user_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            ids.into_iter()
                .filter_map(|id| self.cancel_locked(&mut inner, id))
                .collect::<Vec<_>>()
        };

        let cancelled = self.settle(outcomes);
        tracing::info!(user_id, cancelled, "Cancelled user tasks");
        cancelled
    }

    /// Cancel a single in-flight task
    ///
    /// Asking twice is not an error.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if the task is not in flight
    /// - [`Error::InvalidTransition`] if it already reached a terminal state
    ///   and is waiting to be retired
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let outcome = {
            let mut inner = self.queue_state.inner.lock().await;
            self.cancel_locked(&mut inner, id)
        };

        match outcome {
            None => Err(Error::NotFound(id)),
            Some(CancelOutcome::Retired(task)) => {
                self.finish_pending_cancel(task);
                Ok(())
            }
            Some(CancelOutcome::Requested) => {
                tracing::info!(task_id = id.0, "Cancellation requested for running task");
                Ok(())
            }
            Some(CancelOutcome::Unchanged(state)) if state.is_terminal() => {
                Err(Error::InvalidTransition(TransitionError {
                    from: state,
                    to: TaskState::Cancelled,
                }))
            }
            Some(CancelOutcome::Unchanged(_)) => Ok(()),
        }
    }

    /// Cancel every tracked task regardless of owner
    pub(crate) async fn cancel_everything(&self) -> usize {
        let outcomes = {
            let mut inner = self.queue_state.inner.lock().await;
            let ids: Vec<TaskId> = inner.tasks.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| self.cancel_locked(&mut inner, id))
                .collect::<Vec<_>>()
        };

        self.settle(outcomes)
    }

    /// Finish pending cancellations outside the lock; returns how many tasks changed
    fn settle(&self, outcomes: Vec<CancelOutcome>) -> usize {
        let mut cancelled = 0;
        for outcome in outcomes {
            match outcome {
                CancelOutcome::Retired(task) => {
                    self.finish_pending_cancel(task);
                    cancelled += 1;
                }
                CancelOutcome::Requested => cancelled += 1,
                CancelOutcome::Unchanged(_) => {}
            }
        }
        cancelled
    }

    /// Apply cancellation to one task while holding the queue lock
    fn cancel_locked(&self, inner: &mut QueueInner, id: TaskId) -> Option<CancelOutcome> {
        let cell = inner.tasks.get(&id)?.clone();

        if let Some(position) = inner.pending.iter().position(|pending| *pending == id) {
            inner.pending.remove(position);
            let mut result = Ok(());
            cell.state.send_if_modified(|task| {
                result = task.cancel();
                result.is_ok()
            });
            cell.cancel.cancel();
            if let Err(e) = result {
                tracing::warn!(task_id = id.0, error = %e, "Pending task could not be cancelled");
            }
            return inner
                .retire(id, self.config.download.history_limit)
                .map(CancelOutcome::Retired);
        }

        let mut requested = false;
        cell.state.send_if_modified(|task| {
            requested = task.request_cancel();
            requested
        });
        cell.cancel.cancel();

        if requested {
            Some(CancelOutcome::Requested)
        } else {
            Some(CancelOutcome::Unchanged(cell.state.borrow().state))
        }
    }

    /// Announce a task cancelled while pending and hand it to delivery
    fn finish_pending_cancel(&self, task: Task) {
        tracing::info!(
            task_id = task.id.0,
            user_id = task.user_id(),
            "Pending task cancelled"
        );
        self.emit_event(Event::Cancelled { id: task.id });
        if self
            .runtime
            .completion_tx
            .send(Completion::Retired(task))
            .is_err()
        {
            tracing::debug!("Completion coordinator is gone, skipping delivery");
        }
    }
}
