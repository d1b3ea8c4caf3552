//! Delivery of finished tasks back to the requester
//!
//! The scheduler hands every terminal task to the registered [`Delivery`]
//! exactly once, after the task has left the in-flight set. Whatever the
//! outcome, the task's working directory is deleted afterwards, so an
//! implementation that wants to keep the artifact must move or copy it.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::task::{Task, TaskState};

/// Maximum number of " (N)" suffixes tried before giving up on a unique name
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Caller-supplied delivery path
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Deliver a terminal task (completed, failed or cancelled)
    ///
    /// For `Completed` tasks the artifact is at `task.result_location` and
    /// remains readable until this call returns.
    async fn deliver(&self, task: &Task) -> Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// Delivery that only logs the outcome; the artifact is then discarded
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardDelivery;

#[async_trait]
impl Delivery for DiscardDelivery {
    async fn deliver(&self, task: &Task) -> Result<()> {
        tracing::debug!(
            task_id = task.id.0,
            user_id = task.user_id(),
            state = %task.state,
            "Discarding task result"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "discard"
    }
}

/// Delivery that moves completed artifacts into a directory
///
/// Name collisions are resolved by appending ` (1)`, ` (2)`, ... to the file
/// stem. Failed and cancelled tasks have nothing to deliver.
#[derive(Debug, Clone)]
pub struct DirectoryDelivery {
    dest: PathBuf,
}

impl DirectoryDelivery {
    /// Create a delivery into `dest` (created on first use)
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self { dest: dest.into() }
    }

    /// Destination directory
    pub fn dest(&self) -> &Path {
        &self.dest
    }
}

#[async_trait]
impl Delivery for DirectoryDelivery {
    async fn deliver(&self, task: &Task) -> Result<()> {
        if task.state != TaskState::Completed {
            return Ok(());
        }
        let source = task.result_location.as_deref().ok_or_else(|| {
            Error::Delivery(format!("task {} completed without a result location", task.id))
        })?;
        let file_name = source.file_name().ok_or_else(|| {
            Error::Delivery(format!("invalid artifact path: {}", source.display()))
        })?;

        tokio::fs::create_dir_all(&self.dest).await?;
        let target = unique_path(&self.dest.join(file_name))?;

        // rename fails across filesystems; fall back to copy
        if tokio::fs::rename(source, &target).await.is_err() {
            tokio::fs::copy(source, &target).await?;
        }

        tracing::info!(
            task_id = task.id.0,
            user_id = task.user_id(),
            path = %target.display(),
            "Delivered artifact"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "directory"
    }
}

/// First path of the form `stem (N).ext` that does not exist yet
///
/// Returns `path` itself when it is free.
pub(crate) fn unique_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path.to_path_buf());
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Delivery(format!("cannot extract file stem: {}", path.display())))?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let name = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(Error::Delivery(format!(
        "no free file name for {} after {} attempts",
        path.display(),
        MAX_RENAME_ATTEMPTS
    )))
}
