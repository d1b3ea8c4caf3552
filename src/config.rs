//! Configuration types for shorts-dl

use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf, time::Duration};
use utoipa::ToSchema;

use crate::error::{Error, Result};

/// Upper bound for the worker pool size
pub const MAX_WORKERS: usize = 20;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Download behavior configuration (directory, concurrency, size limit)
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct DownloadConfig {
    /// Working directory for in-progress and fetched artifacts (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Number of concurrent fetch workers, 1-20 (default: 5)
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,

    /// Maximum artifact size in bytes (default: 50 MiB)
    ///
    /// Larger artifacts fail the task with `SizeExceeded` and are deleted.
    #[serde(default = "default_max_output_size")]
    pub max_output_size_bytes: u64,

    /// Number of finished tasks kept for lookups by id (default: 100)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            max_concurrent_downloads: default_max_concurrent(),
            max_output_size_bytes: default_max_output_size(),
            history_limit: default_history_limit(),
        }
    }
}

/// Per-user sliding-window admission limit
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RateLimitConfig {
    /// Submissions admitted per user within one window (default: 10)
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: usize,

    /// Window length, serialized as seconds (default: 60)
    #[serde(
        default = "default_rate_limit_window",
        with = "duration_serde",
        rename = "window_seconds"
    )]
    #[schema(value_type = u64)]
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window: default_rate_limit_window(),
        }
    }
}

/// Accepted source locators
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SourceConfig {
    /// Regular expressions; a source is accepted if any of them matches
    #[serde(default = "default_source_patterns")]
    pub patterns: Vec<String>,

    /// Maximum source length in bytes (default: 2048)
    #[serde(default = "default_max_source_len")]
    pub max_length: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            patterns: default_source_patterns(),
            max_length: default_max_source_len(),
        }
    }
}

/// yt-dlp invocation settings
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ToolsConfig {
    /// Path to the yt-dlp executable (auto-detected if None)
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,

    /// Whether to search PATH for yt-dlp if no explicit path is set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,

    /// yt-dlp format selector (default prefers H.264 + m4a, capped at 1080p)
    #[serde(default = "default_format")]
    pub format: String,

    /// Container the streams are merged into (default: "mp4")
    #[serde(default = "default_merge_format")]
    pub merge_output_format: String,

    /// Socket timeout in seconds (default: 30)
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_secs: u64,

    /// Retry count for downloads, fragments and extractor calls (default: 10)
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// User agent sent to the media host
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Extractor arguments (yt-dlp `--extractor-args`)
    #[serde(default = "default_extractor_args")]
    pub extractor_args: Option<String>,

    /// Extra arguments appended verbatim
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ytdlp_path: None,
            search_path: true,
            format: default_format(),
            merge_output_format: default_merge_format(),
            socket_timeout_secs: default_socket_timeout(),
            retries: default_retries(),
            user_agent: default_user_agent(),
            extractor_args: default_extractor_args(),
            extra_args: Vec::new(),
        }
    }
}

/// What happens to completed artifacts
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct DeliveryConfig {
    /// Directory completed artifacts are moved into (None = discard after completion)
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Address to bind to (default: 127.0.0.1:6790)
    #[serde(default = "default_bind_address")]
    #[schema(value_type = String)]
    pub bind_address: SocketAddr,

    /// Optional API key required in the X-Api-Key header
    #[serde(default)]
    pub api_key: Option<String>,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_key: None,
            cors_enabled: true,
            cors_origins: default_cors_origins(),
        }
    }
}

/// Main configuration
///
/// Download settings are flattened into the top level; the other groups are
/// nested objects.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Download behavior settings
    #[serde(flatten)]
    pub download: DownloadConfig,

    /// Per-user admission limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Accepted source locators
    #[serde(default)]
    pub sources: SourceConfig,

    /// yt-dlp settings
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Completed artifact handling
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,
}

impl Config {
    /// Working directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Check value ranges. Source patterns are compiled separately by
    /// [`SourceValidator`](crate::validation::SourceValidator).
    pub fn validate(&self) -> Result<()> {
        let workers = self.download.max_concurrent_downloads;
        if !(1..=MAX_WORKERS).contains(&workers) {
            return Err(Error::config(
                "max_concurrent_downloads",
                format!("must be between 1 and {}, got {}", MAX_WORKERS, workers),
            ));
        }
        if self.download.max_output_size_bytes == 0 {
            return Err(Error::config(
                "max_output_size_bytes",
                "must be greater than zero",
            ));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(Error::config(
                "rate_limit.max_requests",
                "must be greater than zero",
            ));
        }
        if self.rate_limit.window.is_zero() {
            return Err(Error::config(
                "rate_limit.window_seconds",
                "must be greater than zero",
            ));
        }
        if self.sources.patterns.is_empty() {
            return Err(Error::config(
                "sources.patterns",
                "at least one pattern is required",
            ));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Defaults overlaid with process environment variables
    pub fn from_env() -> Result<Self> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Overlay environment-style settings read through `lookup`
    ///
    /// Recognized keys: `DOWNLOAD_DIR`, `MAX_CONCURRENT_DOWNLOADS`,
    /// `MAX_VIDEO_SIZE_MB`, `RATE_LIMIT_MAX_REQUESTS`,
    /// `RATE_LIMIT_WINDOW_SECONDS`, `YTDLP_PATH`, `OUTPUT_DIR`,
    /// `API_BIND_ADDRESS`, `API_KEY`.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DOWNLOAD_DIR") {
            self.download.download_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup("MAX_CONCURRENT_DOWNLOADS") {
            self.download.max_concurrent_downloads =
                parse_env("MAX_CONCURRENT_DOWNLOADS", &value)?;
        }
        if let Some(value) = lookup("MAX_VIDEO_SIZE_MB") {
            let mb: u64 = parse_env("MAX_VIDEO_SIZE_MB", &value)?;
            self.download.max_output_size_bytes = mb.saturating_mul(BYTES_PER_MB);
        }
        if let Some(value) = lookup("RATE_LIMIT_MAX_REQUESTS") {
            self.rate_limit.max_requests = parse_env("RATE_LIMIT_MAX_REQUESTS", &value)?;
        }
        if let Some(value) = lookup("RATE_LIMIT_WINDOW_SECONDS") {
            let secs: u64 = parse_env("RATE_LIMIT_WINDOW_SECONDS", &value)?;
            self.rate_limit.window = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("YTDLP_PATH") {
            self.tools.ytdlp_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            self.delivery.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = lookup("API_BIND_ADDRESS") {
            self.api.bind_address = parse_env("API_BIND_ADDRESS", &value)?;
        }
        if let Some(key) = lookup("API_KEY").filter(|k| !k.is_empty()) {
            self.api.api_key = Some(key);
        }
        Ok(self)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(key, format!("invalid value {:?}: {}", value, e)))
}

fn default_true() -> bool {
    true
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_concurrent() -> usize {
    5
}

fn default_max_output_size() -> u64 {
    50 * BYTES_PER_MB
}

fn default_history_limit() -> usize {
    100
}

fn default_rate_limit_max_requests() -> usize {
    10
}

fn default_rate_limit_window() -> Duration {
    Duration::from_secs(60)
}

fn default_source_patterns() -> Vec<String> {
    vec![
        r"(?i)^https?://([a-z0-9-]+\.)*youtube\.com/\S+$".into(),
        r"(?i)^https?://([a-z0-9-]+\.)*youtu\.be/[\w-]+\S*$".into(),
    ]
}

fn default_max_source_len() -> usize {
    2048
}

fn default_format() -> String {
    [
        "bestvideo[vcodec^=avc1][height<=1080]+bestaudio[ext=m4a]",
        "bestvideo[vcodec^=avc1]+bestaudio[ext=m4a]",
        "bestvideo[vcodec^=avc1]+bestaudio",
        "bestvideo[ext=mp4]+bestaudio[ext=m4a]",
        "best[ext=mp4]",
        "best",
    ]
    .join("/")
}

fn default_merge_format() -> String {
    "mp4".into()
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    10
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 \
     (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1"
        .into()
}

fn default_extractor_args() -> Option<String> {
    Some(
        "youtube:player_client=ios,android,web_creator,mweb,tv_embedded;player_skip=webpage,configs"
            .into(),
    )
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 6790))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".into()]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
