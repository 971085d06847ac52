//! Per-identity rate limiter.
//!
//! Each identity has a single anchor: the instant of its last *admitted*
//! call. A call is admitted when no anchor exists or at least one window has
//! elapsed since it. Rejected calls leave the anchor untouched, so hammering
//! does not extend the wait.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::ceil_secs;

/// Identities idle for longer than this are dropped by [`RateLimiter::sweep`].
const IDLE_EVICTION: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    window: Duration,
    anchors: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub const DEFAULT_WINDOW: Duration = Duration::from_millis(3000);

    pub fn new(window: Duration) -> Self {
        Self {
            window,
            anchors: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Returns `true` when `id` must wait; otherwise admits the call and
    /// moves the anchor to now.
    pub fn is_rate_limited(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut anchors = self.anchors.lock();
        match anchors.get(id) {
            Some(last) if now.duration_since(*last) < self.window => true,
            _ => {
                anchors.insert(id.to_string(), now);
                false
            }
        }
    }

    /// Seconds until `id` will be admitted again, rounded up.
    pub fn remaining_secs(&self, id: &str) -> u64 {
        let anchors = self.anchors.lock();
        anchors
            .get(id)
            .map(|last| ceil_secs(self.window.saturating_sub(last.elapsed())))
            .unwrap_or(0)
    }

    /// Forgets `id`.
    pub fn reset(&self, id: &str) {
        self.anchors.lock().remove(id);
    }

    /// Drops identities whose anchor is older than the window (and at least a
    /// minute). Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let idle = self.window.max(IDLE_EVICTION);
        let mut anchors = self.anchors.lock();
        let before = anchors.len();
        anchors.retain(|_, last| last.elapsed() < idle);
        let removed = before - anchors.len();
        if removed > 0 {
            debug!(removed, remaining = anchors.len(), "Rate limiter swept");
        }
        removed
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.anchors.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn rejects_within_window() {
        let limiter = RateLimiter::default();
        assert!(!limiter.is_rate_limited("62812"));
        advance(Duration::from_millis(2999)).await;
        assert!(limiter.is_rate_limited("62812"));
        assert_eq!(limiter.remaining_secs("62812"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn admits_after_window_and_reanchors() {
        let limiter = RateLimiter::default();
        assert!(!limiter.is_rate_limited("a"));
        advance(Duration::from_millis(3000)).await;
        assert!(!limiter.is_rate_limited("a"));
        advance(Duration::from_millis(1000)).await;
        // anchored to the second admitted call, not the first
        assert!(limiter.is_rate_limited("a"));
        assert_eq!(limiter.remaining_secs("a"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_do_not_move_the_anchor() {
        let limiter = RateLimiter::default();
        assert!(!limiter.is_rate_limited("a"));
        for _ in 0..5 {
            advance(Duration::from_millis(500)).await;
            assert!(limiter.is_rate_limited("a"));
        }
        advance(Duration::from_millis(500)).await;
        assert!(!limiter.is_rate_limited("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn identities_are_independent() {
        let limiter = RateLimiter::default();
        assert!(!limiter.is_rate_limited("a"));
        assert!(!limiter.is_rate_limited("b"));
        assert_eq!(limiter.remaining_secs("unknown"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_idle_identities() {
        let limiter = RateLimiter::default();
        limiter.is_rate_limited("old");
        advance(Duration::from_secs(61)).await;
        limiter.is_rate_limited("fresh");

        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked(), 1);
        assert_eq!(limiter.sweep(), 0);
    }
}
