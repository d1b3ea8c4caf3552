//! External fetch operation
//!
//! A [`Fetcher`] turns a source URL into a local file. While it runs it reports
//! progress through a [`ProgressHook`]; every hook invocation is a cancellation
//! checkpoint, and a fetcher must stop promptly when the hook answers
//! [`HookAction::Abort`]. Cancellation is best-effort: a fetcher that reports
//! no progress cannot be interrupted.

mod parser;
mod ytdlp;

pub use ytdlp::YtDlpFetcher;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::FetchError;
use crate::task::MediaMetadata;
use crate::types::TaskId;

/// Input of a single fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Task the fetch belongs to (for logging)
    pub task_id: TaskId,
    /// Validated source URL
    pub source: String,
    /// Directory the artifact (and any partial files) must be written to
    pub output_dir: PathBuf,
    /// Configured artifact size limit, enforced by the caller after the fetch
    pub max_output_size_bytes: u64,
}

/// Result of a successful fetch
#[derive(Debug, Clone)]
pub struct FetchOutput {
    /// Path of the produced artifact
    pub path: PathBuf,
    /// Metadata known at the end of the fetch
    pub metadata: MediaMetadata,
}

/// A progress report from a running fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    /// Completion percentage, if known
    pub percent: Option<f64>,
    /// Media metadata discovered so far
    pub metadata: Option<MediaMetadata>,
}

impl ProgressUpdate {
    /// Build a report from byte counts
    ///
    /// The percentage is only set when the total is known and non-zero; the
    /// total is also recorded as the estimated size.
    pub fn from_bytes(downloaded: u64, total: Option<u64>) -> Self {
        match total.filter(|t| *t > 0) {
            Some(total) => Self {
                percent: Some(downloaded as f64 / total as f64 * 100.0),
                metadata: Some(MediaMetadata {
                    estimated_size_bytes: Some(total),
                    ..Default::default()
                }),
            },
            None => Self::default(),
        }
    }

    /// A report carrying only a percentage
    pub fn percent(percent: f64) -> Self {
        Self {
            percent: Some(percent),
            metadata: None,
        }
    }

    /// A report carrying only metadata
    pub fn metadata(metadata: MediaMetadata) -> Self {
        Self {
            percent: None,
            metadata: Some(metadata),
        }
    }
}

/// What the fetcher should do after reporting progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Keep going
    Continue,
    /// Cancellation was requested: stop and return [`FetchError::Aborted`]
    Abort,
}

/// Receiver of progress reports; each call is a cancellation checkpoint
pub trait ProgressHook: Send + Sync {
    /// Record a progress report and say whether the fetch may continue
    fn report(&self, update: ProgressUpdate) -> HookAction;
}

/// The external fetch operation
///
/// Implementations write everything, including partial files, below
/// [`FetchRequest::output_dir`]; the worker deletes that directory when the
/// result is discarded.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch `request.source` into `request.output_dir`
    ///
    /// # Errors
    ///
    /// - [`FetchError::Aborted`] when the hook answered [`HookAction::Abort`]
    /// - [`FetchError::Tool`] for network, permission or format problems,
    ///   with a message suitable for showing to the user
    /// - [`FetchError::Unavailable`] when the fetch tool cannot be run
    async fn fetch(
        &self,
        request: &FetchRequest,
        hook: &dyn ProgressHook,
    ) -> Result<FetchOutput, FetchError>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
