//! Per-identity anti-spam guard.
//!
//! Keeps the recent call instants of every identity, pruned to a trailing
//! window. Every check records the current call, so with a threshold of N
//! the (N+1)-th call inside the window is the first one flagged.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use super::ceil_secs;

/// Snapshot of the guard's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpamStats {
    pub tracked: usize,
    pub live_timestamps: usize,
    /// Identities currently over the threshold.
    pub spamming: usize,
    pub threshold: usize,
    pub window_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    threshold: usize,
    window: Duration,
}

pub struct SpamGuard {
    limits: RwLock<Limits>,
    history: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SpamGuard {
    pub const DEFAULT_THRESHOLD: usize = 5;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            limits: RwLock::new(Limits { threshold, window }),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Records a call from `id` and reports whether it exceeds the threshold.
    pub fn is_spamming(&self, id: &str) -> bool {
        let Limits { threshold, window } = *self.limits.read();
        let now = Instant::now();
        let mut history = self.history.lock();
        let stamps = history.entry(id.to_string()).or_default();
        prune(stamps, now, window);
        stamps.push_back(now);
        stamps.len() > threshold
    }

    /// Calls from `id` still inside the window.
    pub fn message_count(&self, id: &str) -> usize {
        let window = self.limits.read().window;
        let now = Instant::now();
        self.history
            .lock()
            .get(id)
            .map(|stamps| live(stamps, now, window).count())
            .unwrap_or(0)
    }

    /// Seconds until `id` drops back under the threshold, or 0 if it is not
    /// over it. Derived from the oldest call still inside the window.
    pub fn cooldown_secs(&self, id: &str) -> u64 {
        let Limits { threshold, window } = *self.limits.read();
        let now = Instant::now();
        let history = self.history.lock();
        let Some(stamps) = history.get(id) else {
            return 0;
        };
        let mut live = live(stamps, now, window).peekable();
        let Some(oldest) = live.peek().copied() else {
            return 0;
        };
        if live.count() <= threshold {
            return 0;
        }
        ceil_secs(window.saturating_sub(now.duration_since(oldest)))
    }

    /// Forgets everything about `id`.
    pub fn clear(&self, id: &str) {
        if self.history.lock().remove(id).is_some() {
            debug!(identity = %id, "Anti-spam history cleared");
        }
    }

    pub fn stats(&self) -> SpamStats {
        let Limits { threshold, window } = *self.limits.read();
        let now = Instant::now();
        let history = self.history.lock();
        let mut live_timestamps = 0;
        let mut spamming = 0;
        for stamps in history.values() {
            let count = live(stamps, now, window).count();
            live_timestamps += count;
            if count > threshold {
                spamming += 1;
            }
        }
        SpamStats {
            tracked: history.len(),
            live_timestamps,
            spamming,
            threshold,
            window_ms: window.as_millis() as u64,
        }
    }

    /// Replaces the threshold and window. Existing history is kept and
    /// judged by the new window from now on.
    pub fn update_config(&self, threshold: usize, window: Duration) {
        *self.limits.write() = Limits { threshold, window };
        info!(threshold, window = ?window, "Anti-spam limits updated");
    }

    /// Prunes every identity and drops the ones left empty. Returns how many
    /// identities were removed.
    pub fn sweep(&self) -> usize {
        let window = self.limits.read().window;
        let now = Instant::now();
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|_, stamps| {
            prune(stamps, now, window);
            !stamps.is_empty()
        });
        let removed = before - history.len();
        if removed > 0 {
            debug!(removed, remaining = history.len(), "Anti-spam history swept");
        }
        removed
    }
}

impl Default for SpamGuard {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD, Self::DEFAULT_WINDOW)
    }
}

fn live(
    stamps: &VecDeque<Instant>,
    now: Instant,
    window: Duration,
) -> impl Iterator<Item = Instant> + '_ {
    stamps
        .iter()
        .copied()
        .filter(move |ts| now.duration_since(*ts) < window)
}

/// Drops stamps that fell out of the window. Stamps are in arrival order.
fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while stamps
        .front()
        .is_some_and(|ts| now.duration_since(*ts) >= window)
    {
        stamps.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sixth_call_in_window_is_flagged() {
        let guard = SpamGuard::default();
        for _ in 0..5 {
            assert!(!guard.is_spamming("a"));
            advance(Duration::from_millis(100)).await;
        }
        assert!(guard.is_spamming("a"));
        assert_eq!(guard.message_count("a"), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_counts_from_oldest() {
        let guard = SpamGuard::default();
        for _ in 0..6 {
            guard.is_spamming("a");
            advance(Duration::from_millis(500)).await;
        }
        // oldest call is 3s old now
        assert_eq!(guard.cooldown_secs("a"), 7);
        assert_eq!(guard.cooldown_secs("quiet"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn under_threshold_has_no_cooldown() {
        let guard = SpamGuard::default();
        guard.is_spamming("a");
        guard.is_spamming("a");
        assert_eq!(guard.cooldown_secs("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_calls_are_not_counted() {
        let guard = SpamGuard::default();
        for _ in 0..5 {
            guard.is_spamming("a");
        }
        advance(Duration::from_secs(10)).await;
        assert!(!guard.is_spamming("a"));
        assert_eq!(guard.message_count("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_and_clear() {
        let guard = SpamGuard::default();
        guard.is_spamming("gone");
        advance(Duration::from_secs(11)).await;
        guard.is_spamming("here");

        assert_eq!(guard.sweep(), 1);
        let stats = guard.stats();
        assert_eq!(stats.tracked, 1);
        assert_eq!(stats.live_timestamps, 1);

        guard.clear("here");
        assert_eq!(guard.stats().tracked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_count_identities_over_threshold() {
        let guard = SpamGuard::new(2, Duration::from_secs(10));
        for _ in 0..3 {
            guard.is_spamming("loud");
        }
        guard.is_spamming("quiet");
        guard.is_spamming("quiet");

        let stats = guard.stats();
        assert_eq!(stats.tracked, 2);
        assert_eq!(stats.live_timestamps, 5);
        assert_eq!(stats.spamming, 1);

        advance(Duration::from_secs(10)).await;
        assert_eq!(guard.stats().spamming, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn update_config_applies_new_threshold() {
        let guard = SpamGuard::default();
        guard.update_config(1, Duration::from_secs(10));
        assert!(!guard.is_spamming("a"));
        assert!(guard.is_spamming("a"));
        assert_eq!(guard.stats().threshold, 1);
    }
}
