//! Completion coordinator: retires terminal tasks and runs delivery.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::worker_pool::{remove_dir, remove_file};
use super::{Completion, Scheduler};
use crate::delivery::Delivery;
use crate::task::{Task, TaskState};
use crate::types::Event;

impl Scheduler {
    /// Spawn the coordinator draining the completion channel
    ///
    /// For every finished task it removes the task from `in_flight`, records
    /// it in history, emits the terminal event and then starts the delivery.
    /// Deliveries run concurrently; each is followed by deletion of the task's
    /// artifact and working directory, whatever the delivery returned.
    ///
    /// Once per rate window it also drops users whose window went idle.
    pub(crate) fn spawn_coordinator(
        &self,
        mut rx: mpsc::UnboundedReceiver<Completion>,
    ) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        let stop = self.runtime.coordinator_stop.clone();

        tokio::spawn(async move {
            let mut deliveries = JoinSet::new();
            let mut janitor = tokio::time::interval(scheduler.config.rate_limit.window);
            janitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    message = rx.recv() => match message {
                        Some(completion) => scheduler.handle_completion(completion, &mut deliveries).await,
                        None => break,
                    },
                    Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "Delivery task failed to run");
                        }
                    }
                    _ = janitor.tick() => {
                        let purged = scheduler.rate_limiter.purge_expired().await;
                        if purged > 0 {
                            tracing::debug!(purged, "Dropped idle rate-limit windows");
                        }
                    }
                    _ = stop.cancelled() => break,
                }
            }

            // Workers are gone; finish whatever they sent last
            while let Ok(completion) = rx.try_recv() {
                scheduler.handle_completion(completion, &mut deliveries).await;
            }
            while let Some(joined) = deliveries.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Delivery task failed to run");
                }
            }

            tracing::debug!("Completion coordinator stopped");
        })
    }

    async fn handle_completion(&self, completion: Completion, deliveries: &mut JoinSet<()>) {
        let (task, work_dir) = match completion {
            Completion::Finished {
                id,
                work_dir,
                size_bytes,
            } => {
                let retired = {
                    let mut inner = self.queue_state.inner.lock().await;
                    inner.retire(id, self.config.download.history_limit)
                };
                let Some(task) = retired else {
                    tracing::warn!(task_id = id.0, "Finished task was not tracked");
                    return;
                };
                self.emit_terminal_event(&task, size_bytes.unwrap_or(0));
                (task, work_dir)
            }
            // Already retired and announced by the canceller
            Completion::Retired(task) => (task, None),
        };

        deliveries.spawn(deliver_and_clean_up(
            Arc::clone(&self.delivery),
            self.event_tx.clone(),
            task,
            work_dir,
        ));
    }

    fn emit_terminal_event(&self, task: &Task, size_bytes: u64) {
        let event = match task.state {
            TaskState::Completed => Event::Completed {
                id: task.id,
                path: task.result_location.clone().unwrap_or_default(),
                size_bytes,
            },
            TaskState::Failed => Event::Failed {
                id: task.id,
                reason: task
                    .failure_reason
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown error".to_string()),
            },
            TaskState::Cancelled => Event::Cancelled { id: task.id },
            TaskState::Pending | TaskState::Running => {
                tracing::error!(task_id = task.id.0, state = %task.state, "Retired a non-terminal task");
                return;
            }
        };
        self.emit_event(event);
    }
}

/// Hand one task to the delivery path, then delete its local files
async fn deliver_and_clean_up(
    delivery: Arc<dyn Delivery>,
    event_tx: broadcast::Sender<Event>,
    task: Task,
    work_dir: Option<PathBuf>,
) {
    let result = AssertUnwindSafe(delivery.deliver(&task))
        .catch_unwind()
        .await;

    let event = match result {
        Ok(Ok(())) => {
            tracing::debug!(task_id = task.id.0, delivery = delivery.name(), "Task delivered");
            Event::Delivered { id: task.id }
        }
        Ok(Err(e)) => {
            tracing::warn!(
                task_id = task.id.0,
                delivery = delivery.name(),
                error = %e,
                "Delivery failed"
            );
            Event::DeliveryFailed {
                id: task.id,
                error: e.to_string(),
            }
        }
        Err(_) => {
            tracing::error!(task_id = task.id.0, delivery = delivery.name(), "Delivery panicked");
            Event::DeliveryFailed {
                id: task.id,
                error: "delivery panicked".to_string(),
            }
        }
    };

    if let Some(path) = &task.result_location {
        remove_file(path).await;
    }
    if let Some(dir) = &work_dir {
        remove_dir(dir).await;
    }

    let _ = event_tx.send(event);
}
