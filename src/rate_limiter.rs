//! Per-user sliding-window admission limiter
//!
//! Each user owns an ordered list of admission timestamps. The window is the
//! closed interval `[now - window, now]`, so an entry exactly `window` old
//! still counts. On every check older entries are pruned; a request is
//! admitted when fewer than `max_requests` remain, and only an admitted
//! request appends a new timestamp.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::types::UserId;

/// Sliding-window rate limiter keyed by user
///
/// A single mutex guards the whole table; admission is rare compared to fetch
/// duration, so contention is not a concern.
pub struct RateLimiter {
    /// Per-user admission timestamps, oldest first
    windows: Mutex<HashMap<UserId, VecDeque<Instant>>>,
    /// Requests admitted per window
    max_requests: usize,
    /// Window length
    window: Duration,
}

impl RateLimiter {
    /// Create a rate limiter from configuration
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_requests: config.max_requests,
            window: config.window,
        }
    }

    /// Check and record a request
    ///
    /// Returns `true` and records the request timestamp when the user has
    /// budget left in the current window; returns `false` without any state
    /// change otherwise.
    pub async fn is_allowed(&self, user_id: UserId) -> bool {
        self.try_acquire(user_id).await.is_ok()
    }

    /// Check and record a request, reporting how long to wait on denial
    pub(crate) async fn try_acquire(&self, user_id: UserId) -> Result<(), Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let timestamps = windows.entry(user_id).or_default();
        Self::prune(timestamps, now, self.window);

        if timestamps.len() < self.max_requests {
            timestamps.push_back(now);
            Ok(())
        } else {
            let retry_after = timestamps
                .front()
                .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
                .unwrap_or_default();
            Err(retry_after)
        }
    }

    /// Number of additional requests the user may make in the current window
    ///
    /// Does not mutate state.
    pub async fn get_remaining(&self, user_id: UserId) -> usize {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        let used = windows
            .get(&user_id)
            .map(|timestamps| {
                timestamps
                    .iter()
                    .filter(|t| Self::in_window(**t, now, self.window))
                    .count()
            })
            .unwrap_or(0);
        self.max_requests.saturating_sub(used)
    }

    /// Time until the user's oldest in-window request expires, if the window is full
    pub async fn retry_after(&self, user_id: UserId) -> Option<Duration> {
        let now = Instant::now();
        let windows = self.windows.lock().await;
        let timestamps = windows.get(&user_id)?;
        let mut live = timestamps
            .iter()
            .filter(|t| Self::in_window(**t, now, self.window));
        let oldest = live.next()?;
        if live.count() + 1 < self.max_requests {
            return None;
        }
        Some((*oldest + self.window).saturating_duration_since(now))
    }

    /// Drop every user whose window has fully expired
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, timestamps| {
            Self::prune(timestamps, now, self.window);
            !timestamps.is_empty()
        });
        before - windows.len()
    }

    fn in_window(timestamp: Instant, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(timestamp) <= window
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = timestamps.front() {
            if Self::in_window(*oldest, now, window) {
                break;
            }
            timestamps.pop_front();
        }
    }
}
