//! Admission-control state: per-identity sliding windows, the blocklist and
//! the destination-notice de-dup cache.
//!
//! Each structure owns its state behind a lock and is mutated only through
//! its methods. None of them runs timers itself; the runtime calls the
//! `sweep`/`clear` entry points on fixed intervals.

pub mod anti_spam;
pub mod blocklist;
pub mod notice;
pub mod rate_limit;

use std::time::Duration;

pub use anti_spam::{SpamGuard, SpamStats};
pub use blocklist::{Blocklist, BlocklistStats};
pub use notice::NoticeCache;
pub use rate_limit::RateLimiter;

/// Whole seconds in `d`, rounded up.
pub(crate) fn ceil_secs(d: Duration) -> u64 {
    (d.as_millis() as u64).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_rounds_partial_seconds_up() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(3000)), 3);
        assert_eq!(ceil_secs(Duration::from_millis(3001)), 4);
    }
}
