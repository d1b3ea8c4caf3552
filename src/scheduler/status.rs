//! Status queries, task lookup and event subscription.

use std::sync::atomic::Ordering;

use tokio::sync::{broadcast, watch};

use super::Scheduler;
use crate::task::Task;
use crate::types::{Event, QueueStats, TaskId, UserId, UserStatus};

impl Scheduler {
    /// Snapshot of a user's queue position and rate budget
    ///
    /// `queued` counts the user's tasks still in the pending queue; `active`
    /// counts the user's other in-flight tasks (claimed by a worker).
    pub async fn status(&self, user_id: UserId) -> UserStatus {
        let (queued, active, pending_total, running_total) = {
            let inner = self.queue_state.inner.lock().await;
            let own = inner.in_flight.get(&user_id);
            let queued = own
                .map(|ids| inner.pending.iter().filter(|id| ids.contains(*id)).count())
                .unwrap_or(0);
            let active = own.map(|ids| ids.len()).unwrap_or(0) - queued;
            let pending_total = inner.pending.len();
            let running_total = inner.tasks.len().saturating_sub(pending_total);
            (queued, active, pending_total, running_total)
        };

        UserStatus {
            queued,
            active,
            remaining_requests: self.rate_limiter.get_remaining(user_id).await,
            pending_total,
            running_total,
            max_concurrent: self.config.download.max_concurrent_downloads,
        }
    }

    /// Queue-wide statistics
    pub async fn queue_stats(&self) -> QueueStats {
        let inner = self.queue_state.inner.lock().await;
        QueueStats {
            pending: inner.pending.len(),
            running: inner.tasks.len().saturating_sub(inner.pending.len()),
            users: inner.in_flight.len(),
            max_concurrent: self.config.download.max_concurrent_downloads,
            accepting_new: self.queue_state.accepting_new.load(Ordering::SeqCst),
        }
    }

    /// Current record of an in-flight task, or its final snapshot from history
    pub async fn task(&self, id: TaskId) -> Option<Task> {
        let inner = self.queue_state.inner.lock().await;
        if let Some(cell) = inner.tasks.get(&id) {
            return Some(cell.snapshot());
        }
        inner.history.iter().rev().find(|task| task.id == id).cloned()
    }

    /// All in-flight tasks of a user, oldest first
    pub async fn user_tasks(&self, user_id: UserId) -> Vec<Task> {
        let inner = self.queue_state.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .in_flight
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.tasks.get(id))
            .map(|cell| cell.snapshot())
            .collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }

    /// Watch an in-flight task's record
    ///
    /// The receiver sees every state, progress and metadata change until the
    /// task is retired; after that `changed()` returns an error and the last
    /// value stays readable.
    pub async fn watch(&self, id: TaskId) -> Option<watch::Receiver<Task>> {
        let inner = self.queue_state.inner.lock().await;
        inner.tasks.get(&id).map(|cell| cell.state.subscribe())
    }

    /// Subscribe to lifecycle events
    ///
    /// Each subscriber independently receives all events emitted after
    /// subscribing. A slow subscriber that falls more than 1000 events behind
    /// sees `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }
}
