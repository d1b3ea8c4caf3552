//! Task queue and worker-pool scheduler with per-user admission control
//!
//! The `Scheduler` struct and its methods are organized by concern:
//! - [`admission`] - Validation, rate limiting and enqueueing
//! - [`control`] - Per-task and per-user cancellation
//! - [`status`] - Status queries, task lookup and event subscription
//! - [`worker_pool`] - Fixed-size pool of fetch executors
//! - [`completion`] - Terminal-task coordinator and delivery
//! - [`lifecycle`] - Construction, startup and shutdown
//!
//! # Ownership
//!
//! One mutex guards `pending`, `in_flight` and the history ring. Each task
//! record lives in its own `watch` channel; only the worker executing a task
//! (or the canceller, for tasks still pending) mutates it. Workers never touch
//! `pending`/`in_flight` beyond dequeueing; terminal tasks are retired by the
//! completion coordinator.

mod admission;
mod completion;
mod control;
mod lifecycle;
mod status;
mod worker_pool;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};

use tokio::sync::{Mutex, Notify, broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::delivery::Delivery;
use crate::fetch::Fetcher;
use crate::rate_limiter::RateLimiter;
use crate::task::Task;
use crate::types::{Event, TaskId, UserId};
use crate::validation::SourceValidator;

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// A tracked task: its observable record plus the cancellation token the
/// worker's progress hook polls
pub(crate) struct TaskCell {
    /// Current task record; subscribers get every modification
    pub(crate) state: watch::Sender<Task>,
    /// Cancelled when the user asks to cancel this task
    pub(crate) cancel: CancellationToken,
}

impl TaskCell {
    fn new(task: Task) -> Self {
        let (state, _rx) = watch::channel(task);
        Self {
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Clone of the current task record
    pub(crate) fn snapshot(&self) -> Task {
        self.state.borrow().clone()
    }
}

/// State guarded by the queue mutex
#[derive(Default)]
pub(crate) struct QueueInner {
    /// Admitted tasks not yet claimed by a worker, oldest first
    pub(crate) pending: VecDeque<TaskId>,
    /// Non-terminal tasks per user (pending or running)
    pub(crate) in_flight: HashMap<UserId, HashSet<TaskId>>,
    /// Every tracked (in-flight) task
    pub(crate) tasks: HashMap<TaskId, Arc<TaskCell>>,
    /// Most recent terminal snapshots, oldest first
    pub(crate) history: VecDeque<Task>,
}

impl QueueInner {
    /// Remove a task from `in_flight` and the task table and record its final
    /// snapshot in history. Returns `None` if the task was not tracked.
    pub(crate) fn retire(&mut self, id: TaskId, history_limit: usize) -> Option<Task> {
        let cell = self.tasks.remove(&id)?;
        let task = cell.snapshot();

        if let Some(ids) = self.in_flight.get_mut(&task.user_id()) {
            ids.remove(&id);
            if ids.is_empty() {
                self.in_flight.remove(&task.user_id());
            }
        }

        if history_limit > 0 {
            while self.history.len() >= history_limit {
                self.history.pop_front();
            }
            self.history.push_back(task.clone());
        }
        Some(task)
    }
}

/// Queue state shared by admission, workers and the coordinator
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Pending queue, in-flight index, task table and history
    pub(crate) inner: Arc<Mutex<QueueInner>>,
    /// Wakes one idle worker per admitted task
    pub(crate) work_available: Arc<Notify>,
    /// Flag to indicate whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Next task ID
    pub(crate) next_id: Arc<AtomicU64>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            work_available: Arc::new(Notify::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

/// Message sent to the completion coordinator
#[derive(Debug)]
pub(crate) enum Completion {
    /// A worker drove the task to a terminal state; the coordinator retires it
    Finished {
        /// Task ID
        id: TaskId,
        /// Per-task working directory to delete after delivery
        work_dir: Option<PathBuf>,
        /// Artifact size, for completed tasks
        size_bytes: Option<u64>,
    },
    /// The task was already retired (cancelled while pending); deliver only
    Retired(Task),
}

/// Background task handles and shutdown signals
#[derive(Clone)]
pub(crate) struct Runtime {
    /// Sender side of the completion channel
    pub(crate) completion_tx: mpsc::UnboundedSender<Completion>,
    /// Receiver side, taken by the coordinator on start
    pub(crate) completion_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Completion>>>>,
    /// Stops the workers
    pub(crate) shutdown: CancellationToken,
    /// Stops the coordinator once the workers are gone
    pub(crate) coordinator_stop: CancellationToken,
    /// Worker loop handles
    pub(crate) workers: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
    /// Coordinator handle
    pub(crate) coordinator: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    /// Whether `start` already ran
    pub(crate) started: Arc<AtomicBool>,
}

impl Runtime {
    fn new() -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            completion_tx,
            completion_rx: Arc::new(Mutex::new(Some(completion_rx))),
            shutdown: CancellationToken::new(),
            coordinator_stop: CancellationToken::new(),
            workers: Arc::new(Mutex::new(Vec::new())),
            coordinator: Arc::new(Mutex::new(None)),
            started: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Main scheduler instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Scheduler {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Compiled source patterns
    pub(crate) validator: Arc<SourceValidator>,
    /// Per-user admission limiter
    pub(crate) rate_limiter: Arc<RateLimiter>,
    /// External fetch operation
    pub(crate) fetcher: Arc<dyn Fetcher>,
    /// Caller-supplied delivery path
    pub(crate) delivery: Arc<dyn Delivery>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Queue and task state
    pub(crate) queue_state: QueueState,
    /// Background tasks
    pub(crate) runtime: Runtime,
}

impl Scheduler {
    /// Emit an event to all subscribers
    ///
    /// Having no subscribers is not an error.
    pub(crate) fn emit_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// The configuration this scheduler was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Working directory of one task
    pub(crate) fn work_dir(&self, id: TaskId) -> PathBuf {
        self.config.download_dir().join(format!("task_{}", id))
    }
}
