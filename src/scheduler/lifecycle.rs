//! Construction, startup and graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::broadcast;

use super::{EVENT_CHANNEL_CAPACITY, QueueState, Runtime, Scheduler};
use crate::config::Config;
use crate::delivery::Delivery;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::rate_limiter::RateLimiter;
use crate::types::Event;
use crate::validation::SourceValidator;

/// How long shutdown waits for workers and deliveries
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Scheduler {
    /// Create a scheduler
    ///
    /// Validates the configuration, compiles the source patterns and creates
    /// the working directory. No background task runs until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for out-of-range settings or bad patterns and
    /// [`Error::Io`] if the working directory cannot be created.
    pub async fn new(
        config: Config,
        fetcher: Arc<dyn Fetcher>,
        delivery: Arc<dyn Delivery>,
    ) -> Result<Self> {
        config.validate()?;
        let validator = SourceValidator::new(&config.sources)?;

        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download_dir().display(),
                        e
                    ),
                ))
            })?;

        // Buffer of 1000 events; each subscriber receives every event independently
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            download_dir = %config.download_dir().display(),
            workers = config.download.max_concurrent_downloads,
            max_output_size_bytes = config.download.max_output_size_bytes,
            fetcher = fetcher.name(),
            delivery = delivery.name(),
            "Scheduler created"
        );

        Ok(Self {
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            validator: Arc::new(validator),
            config: Arc::new(config),
            fetcher,
            delivery,
            event_tx,
            queue_state: QueueState::new(),
            runtime: Runtime::new(),
        })
    }

    /// Spawn the worker pool and the completion coordinator
    ///
    /// Calling it again is a no-op.
    pub async fn start(&self) {
        if self.runtime.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let Some(rx) = self.runtime.completion_rx.lock().await.take() else {
            return;
        };
        *self.runtime.coordinator.lock().await = Some(self.spawn_coordinator(rx));
        self.runtime.workers.lock().await.extend(self.spawn_workers());

        tracing::info!(
            workers = self.config.download.max_concurrent_downloads,
            "Scheduler started"
        );
    }

    /// Serve the REST API on `api.bind_address` in a background task
    pub fn spawn_api_server(&self) -> tokio::task::JoinHandle<Result<()>> {
        let scheduler = self.clone();
        let config = Arc::clone(&self.config);

        tokio::spawn(async move { crate::api::start_api_server(scheduler, config).await })
    }

    /// Whether new submissions are accepted
    pub fn is_accepting(&self) -> bool {
        self.queue_state.accepting_new.load(Ordering::SeqCst)
    }

    /// Gracefully shut down
    ///
    /// Stops admission, cancels every in-flight task, stops the workers once
    /// their current fetch returns, lets pending deliveries finish and emits
    /// [`Event::Shutdown`]. Waits at most 30 seconds for the background tasks.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new tasks
        self.queue_state.accepting_new.store(false, Ordering::SeqCst);

        // 2. Cancel everything still in flight
        let cancelled = self.cancel_everything().await;
        tracing::info!(cancelled, "Cancelled in-flight tasks");

        // 3. Stop workers, then the coordinator once they are gone
        self.runtime.shutdown.cancel();
        let workers: Vec<_> = self.runtime.workers.lock().await.drain(..).collect();
        let coordinator = self.runtime.coordinator.lock().await.take();
        let stop = self.runtime.coordinator_stop.clone();

        let wait = async move {
            for worker in workers {
                if let Err(e) = worker.await {
                    tracing::warn!(error = %e, "Worker ended abnormally");
                }
            }
            stop.cancel();
            if let Some(coordinator) = coordinator {
                if let Err(e) = coordinator.await {
                    tracing::warn!(error = %e, "Completion coordinator ended abnormally");
                }
            }
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, wait).await {
            Ok(()) => tracing::info!("All workers stopped"),
            Err(_) => tracing::warn!("Timeout waiting for workers to stop, proceeding with shutdown"),
        }

        // 4. Emit shutdown event
        self.emit_event(Event::Shutdown);

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
