//! # shorts-dl
//!
//! Rate-limited fetch queue for short videos: users submit URLs, a bounded
//! pool of workers fetches them with an external tool, and every finished
//! task is handed to a delivery path exactly once.
//!
//! ## Guarantees
//!
//! - **Bounded concurrency** - at most `max_concurrent_downloads` fetches run at once
//! - **FIFO** - tasks start in admission order across all users
//! - **Per-user rate limit** - sliding window, checked before a task is created
//! - **Cooperative cancellation** - every progress report is a checkpoint
//! - **Event-driven** - consumers subscribe to lifecycle events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shorts_dl::{Config, DiscardDelivery, Scheduler, YtDlpFetcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let fetcher = YtDlpFetcher::from_config(&config.tools)?;
//!     let scheduler = Scheduler::new(config, Arc::new(fetcher), Arc::new(DiscardDelivery)).await?;
//!     scheduler.start().await;
//!
//!     let mut events = scheduler.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let id = scheduler.submit(42, "https://youtube.com/shorts/abc123", 0).await?;
//!     println!("queued task {}", id);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Configuration types
pub mod config;
/// Delivery of finished tasks
pub mod delivery;
/// Error types
pub mod error;
/// External fetch operation
pub mod fetch;
/// Per-user sliding-window rate limiter
pub mod rate_limiter;
/// Task queue, worker pool and cancellation
pub mod scheduler;
/// Task record and its state machine
pub mod task;
/// Core types and events
pub mod types;
/// Source URL validation
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use delivery::{Delivery, DirectoryDelivery, DiscardDelivery};
pub use error::{ApiError, Error, ErrorDetail, FetchError, Result, ToHttpStatus};
pub use fetch::{
    FetchOutput, FetchRequest, Fetcher, HookAction, ProgressHook, ProgressUpdate, YtDlpFetcher,
};
pub use scheduler::Scheduler;
pub use task::{FailureReason, MediaMetadata, Task, TaskState};
pub use types::{Correlation, Event, QueueStats, TaskId, UserId, UserStatus};

/// Run until SIGINT/SIGTERM, then shut the scheduler down gracefully.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use shorts_dl::{Config, DiscardDelivery, Scheduler, YtDlpFetcher, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let fetcher = Arc::new(YtDlpFetcher::from_config(&config.tools)?);
///     let scheduler = Scheduler::new(config, fetcher, Arc::new(DiscardDelivery)).await?;
///     scheduler.start().await;
///
///     run_with_shutdown(scheduler).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(scheduler: Scheduler) -> Result<()> {
    wait_for_signal().await;
    scheduler.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
