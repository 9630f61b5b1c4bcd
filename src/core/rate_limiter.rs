//! Per-client request rate limiting.
//!
//! One counting window per client key (usually the client IP). A window
//! records when it started and how many requests it has seen; it resets
//! atomically once its length has elapsed. The increment-and-compare for a
//! key happens under that key's exclusive `scc::HashMap` entry guard, so
//! concurrent requests from one client can never both claim the last slot.
//! Rejections report how long the client should wait before retrying.
use std::time::{Duration, Instant};

use scc::HashMap;

use crate::config::RateLimitConfig;

/// Outcome of asking the limiter to admit one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Over the limit; `retry_after` is the time until the window resets.
    Limited { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

#[derive(Debug)]
struct Window {
    started_at: Instant,
    count: u64,
}

/// Fixed-window counter shared by every request-handling task.
pub struct ClientRateLimiter {
    limit: u64,
    window: Duration,
    windows: HashMap<String, Window>,
}

impl ClientRateLimiter {
    /// Build a limiter from configuration. Fails only on an unparseable
    /// window string or a zero limit, both of which startup validation
    /// already rejects.
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, String> {
        if config.requests == 0 {
            return Err("rate limit 'requests' must be greater than 0".to_string());
        }
        Ok(Self::new(config.requests, config.window_duration()?))
    }

    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: HashMap::new(),
        }
    }

    /// Admit or reject one request for `client_key`.
    ///
    /// Starts a fresh window when none exists or the current one has
    /// expired; otherwise increments the count and compares against the
    /// limit. The whole read-modify-write holds the key's entry exclusively.
    pub async fn admit(&self, client_key: &str) -> Admission {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry_async(client_key.to_string())
            .await
            .or_insert_with(|| Window {
                started_at: now,
                count: 0,
            });

        let window = entry.get_mut();
        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.count = 0;
        }

        window.count += 1;
        if window.count > self.limit {
            let elapsed = now.duration_since(window.started_at);
            Admission::Limited {
                retry_after: self.window.saturating_sub(elapsed),
            }
        } else {
            Admission::Allowed
        }
    }

    /// Number of client keys currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drop windows that expired before `now`; the gateway runs this on a
    /// periodic maintenance task so one-off clients do not accumulate
    /// forever.
    pub async fn evict_expired(&self) {
        let now = Instant::now();
        let window_len = self.window;
        self.windows
            .retain_async(|_, window| now.duration_since(window.started_at) < window_len)
            .await;
    }
}
