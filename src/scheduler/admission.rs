//! Admission: validation, shutdown check, rate limiting, enqueueing.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::{Scheduler, TaskCell};
use crate::error::{Error, Result};
use crate::task::Task;
use crate::types::{Correlation, Event, TaskId, UserId};

impl Scheduler {
    /// Admit a fetch request
    ///
    /// Checks run in order: the source must be accepted by the validator, the
    /// scheduler must not be shutting down, and the user must have budget left
    /// in the rate window. Only a request passing all three consumes a
    /// rate-limit slot. On success the task is appended to the pending queue,
    /// one idle worker is woken and [`Event::Queued`] is emitted.
    ///
    /// Never waits for the fetch itself.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidSource`] if the source is rejected
    /// - [`Error::ShuttingDown`] once shutdown has begun
    /// - [`Error::RateLimited`] if the user exhausted the window
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use shorts_dl::*;
    /// # async fn example(scheduler: Scheduler) -> Result<()> {
    /// let id = scheduler
    ///     .submit(42, "https://www.youtube.com/shorts/abc123", 7)
    ///     .await?;
    /// println!("queued as {}", id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn submit(&self, user_id: UserId, source: &str, message_id: i64) -> Result<TaskId> {
        let source = self.validator.validate(source)?;

        if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let id = {
            let mut inner = self.queue_state.inner.lock().await;
            // Shutdown flips the flag before draining under this lock
            if !self.queue_state.accepting_new.load(Ordering::SeqCst) {
                return Err(Error::ShuttingDown);
            }

            self.rate_limiter
                .try_acquire(user_id)
                .await
                .map_err(|retry_after| {
                    tracing::debug!(user_id, ?retry_after, "Submission rate limited");
                    Error::RateLimited {
                        user_id,
                        retry_after,
                    }
                })?;

            let id = TaskId(self.queue_state.next_id.fetch_add(1, Ordering::SeqCst));
            let task = Task::new(id, Correlation::new(user_id, message_id), source.clone());
            inner.tasks.insert(id, Arc::new(TaskCell::new(task)));
            inner.in_flight.entry(user_id).or_default().insert(id);
            inner.pending.push_back(id);
            // Emitted under the lock so Queued precedes the worker's Started
            self.emit_event(Event::Queued {
                id,
                user_id,
                source,
            });
            id
        };
        self.queue_state.work_available.notify_one();
        tracing::info!(task_id = id.0, user_id, "Task queued");

        Ok(id)
    }
}
