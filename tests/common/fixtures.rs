//! Fetchers, deliveries and configs shared by the integration tests

use async_trait::async_trait;
use shorts_dl::{
    Config, Delivery, FetchError, FetchOutput, FetchRequest, Fetcher, HookAction, ProgressHook,
    ProgressUpdate, Result, Task,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Semaphore;

/// Fetcher writing `size` bytes named after the last URL segment
pub struct StubFetcher {
    /// Artifact size in bytes
    pub size: u64,
    /// When set, each fetch waits for a permit after reporting 50%
    pub gate: Option<Arc<Semaphore>>,
    /// Fetches currently running
    pub running: AtomicUsize,
    /// Highest concurrent fetch count observed
    pub peak: AtomicUsize,
}

impl StubFetcher {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            gate: None,
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn gated(size: u64) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Self {
            gate: Some(gate.clone()),
            ..Self::new(size)
        };
        (fetcher, gate)
    }

    async fn run(
        &self,
        request: &FetchRequest,
        hook: &dyn ProgressHook,
    ) -> std::result::Result<FetchOutput, FetchError> {
        let name = request.source.rsplit('/').next().unwrap_or("video");
        for percent in [25.0, 50.0] {
            if hook.report(ProgressUpdate::percent(percent)) == HookAction::Abort {
                return Err(FetchError::Aborted);
            }
        }

        if let Some(gate) = &self.gate {
            loop {
                tokio::select! {
                    permit = gate.acquire() => {
                        permit.unwrap().forget();
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(5)) => {
                        if hook.report(ProgressUpdate::percent(50.0)) == HookAction::Abort {
                            return Err(FetchError::Aborted);
                        }
                    }
                }
            }
        }

        let path = request.output_dir.join(format!("{}.mp4", name));
        tokio::fs::write(&path, vec![7u8; self.size as usize]).await?;
        hook.report(ProgressUpdate::from_bytes(self.size, Some(self.size)));

        Ok(FetchOutput {
            path,
            metadata: Default::default(),
        })
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        hook: &dyn ProgressHook,
    ) -> std::result::Result<FetchOutput, FetchError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let result = self.run(request, hook).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Delivery remembering every task it was handed
#[derive(Default)]
pub struct CollectingDelivery {
    pub tasks: std::sync::Mutex<Vec<Task>>,
}

impl CollectingDelivery {
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl Delivery for CollectingDelivery {
    async fn deliver(&self, task: &Task) -> Result<()> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collecting"
    }
}

/// Config rooted in `temp_dir` with `workers` workers
pub fn test_config(temp_dir: &TempDir, workers: usize) -> Config {
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("downloads");
    config.download.max_concurrent_downloads = workers;
    config
}

pub fn short_url(video: &str) -> String {
    format!("https://youtube.com/shorts/{}", video)
}
