//! De-duplication of destination-policy notices.
//!
//! An identity told once that the bot does not answer in this kind of chat
//! is not told again until the current epoch ends. Epochs end when the
//! runtime clears the cache on its interval, or when the cache outgrows its
//! cap.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, warn};

pub struct NoticeCache {
    cap: usize,
    seen: Mutex<HashSet<String>>,
}

impl NoticeCache {
    pub const DEFAULT_CAP: usize = 5000;

    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Returns `true` the first time `key` is seen in this epoch.
    pub fn should_notify(&self, key: &str) -> bool {
        let mut seen = self.seen.lock();
        if !seen.insert(key.to_string()) {
            return false;
        }
        if seen.len() > self.cap {
            warn!(cap = self.cap, "Notice cache over capacity, starting a new epoch");
            seen.clear();
        }
        true
    }

    /// Starts a new epoch.
    pub fn clear(&self) {
        let mut seen = self.seen.lock();
        if !seen.is_empty() {
            debug!(entries = seen.len(), "Notice cache cleared");
            seen.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NoticeCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAP)
    }
}
