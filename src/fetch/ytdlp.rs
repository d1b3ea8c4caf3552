//! Fetcher backed by the external yt-dlp binary

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::parser::{self, FILE_TAG, META_TAG, OutputLine, PROGRESS_TAG};
use super::{FetchOutput, FetchRequest, Fetcher, HookAction, ProgressHook, ProgressUpdate};
use crate::config::ToolsConfig;
use crate::error::{Error, FetchError, Result};
use crate::task::MediaMetadata;

/// Number of trailing stderr lines kept for error reporting
const STDERR_TAIL_LINES: usize = 50;

/// Fetcher that runs `yt-dlp` as a subprocess
///
/// Progress, metadata and the final path are read from tagged stdout lines.
/// Each progress line is a cancellation checkpoint: when the hook answers
/// [`HookAction::Abort`] the child process is killed.
///
/// # Examples
///
/// ```no_run
/// use shorts_dl::config::ToolsConfig;
/// use shorts_dl::fetch::YtDlpFetcher;
///
/// let fetcher = YtDlpFetcher::from_path(ToolsConfig::default())
///     .expect("yt-dlp not found in PATH");
/// ```
pub struct YtDlpFetcher {
    binary_path: PathBuf,
    tools: ToolsConfig,
}

impl YtDlpFetcher {
    /// Create a fetcher with an explicit binary path
    pub fn new(binary_path: PathBuf, tools: ToolsConfig) -> Self {
        Self { binary_path, tools }
    }

    /// Attempt to find yt-dlp in PATH
    pub fn from_path(tools: ToolsConfig) -> Option<Self> {
        which::which("yt-dlp")
            .ok()
            .map(|path| Self::new(path, tools))
    }

    /// Build a fetcher from configuration: explicit path first, then PATH search
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExternalTool`] if no binary is configured and none is
    /// found on PATH (or PATH search is disabled).
    pub fn from_config(tools: &ToolsConfig) -> Result<Self> {
        if let Some(path) = &tools.ytdlp_path {
            return Ok(Self::new(path.clone(), tools.clone()));
        }
        if tools.search_path {
            if let Some(fetcher) = Self::from_path(tools.clone()) {
                return Ok(fetcher);
            }
        }
        Err(Error::ExternalTool(
            "yt-dlp binary not found (set tools.ytdlp_path or install yt-dlp on PATH)".into(),
        ))
    }

    /// Path of the binary this fetcher runs
    pub fn binary_path(&self) -> &PathBuf {
        &self.binary_path
    }

    /// Command-line arguments for one fetch
    pub(crate) fn build_args(&self, request: &FetchRequest) -> Vec<OsString> {
        let tools = &self.tools;
        let retries = tools.retries.to_string();
        let short_retries = tools.retries.min(5).to_string();

        let mut args: Vec<String> = vec![
            "--no-playlist".into(),
            "--newline".into(),
            "--no-warnings".into(),
            "--no-simulate".into(),
            "--progress".into(),
            "--format".into(),
            tools.format.clone(),
            "--max-filesize".into(),
            request.max_output_size_bytes.to_string(),
            "--merge-output-format".into(),
            tools.merge_output_format.clone(),
            "--recode-video".into(),
            tools.merge_output_format.clone(),
            "--socket-timeout".into(),
            tools.socket_timeout_secs.to_string(),
            "--retries".into(),
            retries.clone(),
            "--fragment-retries".into(),
            retries,
            "--extractor-retries".into(),
            short_retries.clone(),
            "--file-access-retries".into(),
            short_retries,
            "--user-agent".into(),
            tools.user_agent.clone(),
            "--add-header".into(),
            "Accept:text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into(),
            "--add-header".into(),
            "Accept-Language:en-US,en;q=0.5".into(),
            "--add-header".into(),
            "Referer:https://www.youtube.com/".into(),
        ];

        if let Some(extractor_args) = &tools.extractor_args {
            args.push("--extractor-args".into());
            args.push(extractor_args.clone());
        }

        args.push("--progress-template".into());
        args.push(format!(
            "download:{} %(progress.downloaded_bytes)s %(progress.total_bytes)s %(progress.total_bytes_estimate)s",
            PROGRESS_TAG
        ));
        args.push("--print".into());
        args.push(format!(
            "before_dl:{} %(duration)s\t%(uploader)s\t%(title)s",
            META_TAG
        ));
        args.push("--print".into());
        args.push(format!("after_move:{} %(filepath)s", FILE_TAG));
        args.extend(tools.extra_args.iter().cloned());

        let mut args: Vec<OsString> = args.into_iter().map(OsString::from).collect();
        args.push(OsString::from("--output"));
        args.push(
            request
                .output_dir
                .join("%(title).100s.%(ext)s")
                .into_os_string(),
        );
        args.push(OsString::from("--"));
        args.push(OsString::from(&request.source));
        args
    }
}

#[async_trait]
impl Fetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        request: &FetchRequest,
        hook: &dyn ProgressHook,
    ) -> std::result::Result<FetchOutput, FetchError> {
        tracing::info!(
            task_id = request.task_id.0,
            source = %request.source,
            "Starting yt-dlp"
        );

        let mut child = Command::new(&self.binary_path)
            .args(self.build_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| FetchError::Unavailable(format!("failed to execute yt-dlp: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FetchError::Unavailable("yt-dlp stdout not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FetchError::Unavailable("yt-dlp stderr not captured".into()))?;
        let stderr_task = tokio::spawn(read_tail(stderr));

        let mut metadata = MediaMetadata::default();
        let mut output_path = None;
        let mut skipped_reason = None;
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines.next_line().await? {
            let action = match parser::parse_line(&line) {
                OutputLine::Progress { downloaded, total } => {
                    hook.report(ProgressUpdate::from_bytes(downloaded, total))
                }
                OutputLine::Metadata(meta) => {
                    metadata.merge(meta.clone());
                    hook.report(ProgressUpdate::metadata(meta))
                }
                OutputLine::Output(path) => {
                    output_path = Some(path);
                    HookAction::Continue
                }
                OutputLine::Other => {
                    // yt-dlp skips oversize media with exit status 0
                    if line.contains("max-filesize") {
                        skipped_reason = Some(line.trim_start_matches("[download]").trim().to_string());
                    }
                    HookAction::Continue
                }
            };

            if action == HookAction::Abort {
                tracing::info!(task_id = request.task_id.0, "Aborting yt-dlp");
                if let Err(e) = child.kill().await {
                    tracing::warn!(task_id = request.task_id.0, error = %e, "Failed to kill yt-dlp");
                }
                stderr_task.abort();
                return Err(FetchError::Aborted);
            }
        }

        let status = child.wait().await?;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let message = parser::error_message(&stderr_tail)
                .unwrap_or_else(|| format!("yt-dlp exited with {}", status));
            tracing::warn!(
                task_id = request.task_id.0,
                %status,
                error = %message,
                "yt-dlp failed"
            );
            return Err(FetchError::Tool(message));
        }

        let path = output_path.ok_or_else(|| {
            FetchError::Tool(
                skipped_reason.unwrap_or_else(|| "yt-dlp did not report an output file".into()),
            )
        })?;

        tracing::debug!(
            task_id = request.task_id.0,
            path = %path.display(),
            "yt-dlp finished"
        );

        Ok(FetchOutput { path, metadata })
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}

/// Drain a stream, keeping only its last lines
async fn read_tail<R: AsyncRead + Unpin>(reader: R) -> String {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = std::collections::VecDeque::with_capacity(STDERR_TAIL_LINES);
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}
