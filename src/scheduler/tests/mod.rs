//! Scheduler tests with a scripted fetcher and a recording delivery.
//!
//! The mock fetcher picks its behavior from the video id of the source URL:
//! `https://youtu.be/fail-*` fails, `panic-*` panics, `empty-*` writes an
//! empty file, `missing-*` reports a file it never wrote, `big-*` writes an
//! artifact of `big_size` bytes, `stubborn-*` ignores `Abort` once it has
//! reported and finishes after the gate opens (`stubborn-fail-*` then fails);
//! anything else writes `size` bytes.


pub(super) use super::*;
pub(super) use crate::config::Config;
pub(super) use crate::delivery::Delivery;
pub(super) use crate::error::{Error, FetchError};
pub(super) use crate::fetch::{
    FetchOutput, FetchRequest, Fetcher, HookAction, ProgressHook, ProgressUpdate,
};
pub(super) use crate::task::{FailureReason, Task, TaskState};
pub(super) use crate::types::{Event, TaskId};

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Upper bound for any single wait in these tests
pub(crate) const WAIT: Duration = Duration::from_secs(10);

/// Fetcher whose behavior is scripted by the source URL
pub(crate) struct MockFetcher {
    /// Size of normal artifacts
    pub(crate) size: u64,
    /// Size of `big-*` artifacts
    pub(crate) big_size: u64,
    /// When set, every fetch waits for one permit after reporting 50%
    pub(crate) gate: Option<Arc<Semaphore>>,
    /// Fetches currently inside `fetch`
    pub(crate) running: AtomicUsize,
    /// Highest value `running` ever reached
    pub(crate) max_running: AtomicUsize,
    /// Sources in the order fetches started
    pub(crate) started: std::sync::Mutex<Vec<String>>,
}

impl MockFetcher {
    pub(crate) fn new() -> Self {
        Self {
            size: 1024,
            big_size: 60_000_000,
            gate: None,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A fetcher that blocks every fetch until a permit is added to the returned gate
    pub(crate) fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (fetcher, gate)
    }

    pub(crate) fn started_sources(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// Wait for a gate permit, reporting progress every few milliseconds so
    /// cancellation can interrupt the wait
    async fn wait_for_gate(
        gate: &Semaphore,
        hook: &dyn ProgressHook,
    ) -> std::result::Result<(), FetchError> {
        loop {
            tokio::select! {
                permit = gate.acquire() => {
                    permit.unwrap().forget();
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(5)) => {
                    if hook.report(ProgressUpdate::percent(50.0)) == HookAction::Abort {
                        return Err(FetchError::Aborted);
                    }
                }
            }
        }
    }

    async fn script(
        &self,
        request: &FetchRequest,
        hook: &dyn ProgressHook,
    ) -> std::result::Result<FetchOutput, FetchError> {
        let video = request.source.rsplit('/').next().unwrap_or_default().to_string();
        let path = request.output_dir.join(format!("{}.mp4", video));

        if video.starts_with("stubborn") {
            let _ = hook.report(ProgressUpdate::percent(10.0));
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if video.starts_with("stubborn-fail") {
                return Err(FetchError::Tool("ERROR: stubborn failure".into()));
            }
            let file = std::fs::File::create(&path)?;
            file.set_len(self.size)?;
            return Ok(FetchOutput {
                path,
                metadata: Default::default(),
            });
        }

        hook.report(ProgressUpdate::metadata(crate::task::MediaMetadata {
            title: Some(video.clone()),
            duration_secs: Some(30),
            ..Default::default()
        }));
        if hook.report(ProgressUpdate::percent(10.0)) == HookAction::Abort {
            return Err(FetchError::Aborted);
        }
        if hook.report(ProgressUpdate::percent(50.0)) == HookAction::Abort {
            return Err(FetchError::Aborted);
        }

        if let Some(gate) = &self.gate {
            Self::wait_for_gate(gate, hook).await?;
        }

        if video.starts_with("fail") {
            return Err(FetchError::Tool("[youtube] fail: Video unavailable".into()));
        }
        if video.starts_with("panic") {
            panic!("boom in fetcher");
        }

        let size = if video.starts_with("big") {
            self.big_size
        } else if video.starts_with("empty") {
            0
        } else {
            self.size
        };
        if !video.starts_with("missing") {
            let file = std::fs::File::create(&path)?;
            file.set_len(size)?;
        }

        if hook.report(ProgressUpdate::percent(100.0)) == HookAction::Abort {
            return Err(FetchError::Aborted);
        }

        Ok(FetchOutput {
            path,
            metadata: Default::default(),
        })
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        hook: &dyn ProgressHook,
    ) -> std::result::Result<FetchOutput, FetchError> {
        self.started.lock().unwrap().push(request.source.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        // Decrement even when the script panics
        struct Running<'a>(&'a AtomicUsize);
        impl Drop for Running<'_> {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::SeqCst);
            }
        }
        let _running = Running(&self.running);

        self.script(request, hook).await
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Delivery that records what it was given
#[derive(Default)]
pub(crate) struct RecordingDelivery {
    /// Delivered tasks and whether their artifact existed at delivery time
    pub(crate) delivered: std::sync::Mutex<Vec<(Task, bool)>>,
    /// Fail every delivery
    pub(crate) fail: bool,
}

impl RecordingDelivery {
    pub(crate) fn delivered(&self) -> Vec<(Task, bool)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for RecordingDelivery {
    async fn deliver(&self, task: &Task) -> crate::error::Result<()> {
        let artifact_present = task
            .result_location
            .as_ref()
            .is_some_and(|path| path.exists());
        self.delivered
            .lock()
            .unwrap()
            .push((task.clone(), artifact_present));
        if self.fail {
            return Err(Error::Delivery("chat is gone".into()));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A scheduler wired to mocks, with its working directory kept alive
pub(crate) struct Harness {
    pub(crate) scheduler: Scheduler,
    pub(crate) fetcher: Arc<MockFetcher>,
    pub(crate) delivery: Arc<RecordingDelivery>,
    pub(crate) events: tokio::sync::broadcast::Receiver<Event>,
    /// Tasks whose delivery finished, seen while waiting for other events
    pub(crate) delivered_ids: std::collections::HashSet<TaskId>,
    pub(crate) _temp_dir: TempDir,
}

pub(crate) fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("downloads");
    config.download.max_concurrent_downloads = 2;
    config
}

/// Build and start a scheduler around `fetcher`
pub(crate) async fn harness_with(
    fetcher: MockFetcher,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    harness_with_delivery(fetcher, RecordingDelivery::default(), configure).await
}

pub(crate) async fn harness_with_delivery(
    fetcher: MockFetcher,
    delivery: RecordingDelivery,
    configure: impl FnOnce(&mut Config),
) -> Harness {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&temp_dir);
    configure(&mut config);

    let fetcher = Arc::new(fetcher);
    let delivery = Arc::new(delivery);
    let scheduler = Scheduler::new(config, fetcher.clone(), delivery.clone())
        .await
        .unwrap();
    let events = scheduler.subscribe();
    scheduler.start().await;

    Harness {
        scheduler,
        fetcher,
        delivery,
        events,
        delivered_ids: Default::default(),
        _temp_dir: temp_dir,
    }
}

pub(crate) async fn harness() -> Harness {
    harness_with(MockFetcher::new(), |_| {}).await
}

pub(crate) fn url(video: &str) -> String {
    format!("https://youtu.be/{}", video)
}

impl Harness {
    /// Wait for the first event matching `pred`
    pub(crate) async fn wait_for(&mut self, pred: impl Fn(&Event) -> bool) -> Event {
        let events = &mut self.events;
        let delivered_ids = &mut self.delivered_ids;
        tokio::time::timeout(WAIT, async {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Event::Delivered { id } | Event::DeliveryFailed { id, .. } = &event {
                            delivered_ids.insert(*id);
                        }
                        if pred(&event) {
                            return event;
                        }
                    }
                    Err(e) => panic!("event stream ended: {}", e),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    /// Wait until `id` has been handed to the delivery path and cleaned up
    pub(crate) async fn wait_delivered(&mut self, id: TaskId) {
        if self.delivered_ids.contains(&id) {
            return;
        }
        self.wait_for(|event| {
            matches!(
                event,
                Event::Delivered { id: d } | Event::DeliveryFailed { id: d, .. } if *d == id
            )
        })
        .await;
    }

    /// Wait for `n` Started events
    pub(crate) async fn wait_started(&mut self, n: usize) -> Vec<TaskId> {
        let mut ids = Vec::new();
        while ids.len() < n {
            if let Event::Started { id, .. } =
                self.wait_for(|event| matches!(event, Event::Started { .. })).await
            {
                ids.push(id);
            }
        }
        ids
    }

    pub(crate) async fn final_task(&self, id: TaskId) -> Task {
        self.scheduler.task(id).await.expect("task should be known")
    }
}
