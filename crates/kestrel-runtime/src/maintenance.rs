//! Periodic housekeeping.
//!
//! Each job runs on its own interval until the shared
//! [`CancellationToken`] fires:
//!
//! | Job | Interval | Action |
//! |-----|----------|--------|
//! | limiter sweep | `limits.limiter_sweep_secs` | [`RateLimiter::sweep`] |
//! | spam sweep | `limits.spam_sweep_secs` | [`SpamGuard::sweep`] |
//! | notice reset | `limits.notice_clear_secs` | [`NoticeCache::clear`] |
//! | health sweep | `plugins.health_check_secs` | [`PluginRegistry::health_sweep`] |
//! | metrics cleanup | `plugins.metrics_cleanup_secs` | [`PluginRegistry::cleanup_metrics`] |

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use kestrel_framework::{NoticeCache, PluginRegistry, RateLimiter, SpamGuard};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::KestrelConfig;

/// Intervals for every housekeeping job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub limiter_sweep: Duration,
    pub spam_sweep: Duration,
    pub notice_clear: Duration,
    pub health_check: Duration,
    pub metrics_cleanup: Duration,
    /// Plugins idle longer than this have their metrics reset.
    pub metrics_max_idle: Duration,
}

impl Schedule {
    pub fn from_config(config: &KestrelConfig) -> Self {
        Self {
            limiter_sweep: Duration::from_secs(config.limits.limiter_sweep_secs),
            spam_sweep: Duration::from_secs(config.limits.spam_sweep_secs),
            notice_clear: Duration::from_secs(config.limits.notice_clear_secs),
            health_check: Duration::from_secs(config.plugins.health_check_secs),
            metrics_cleanup: Duration::from_secs(config.plugins.metrics_cleanup_secs),
            metrics_max_idle: Duration::from_secs(config.plugins.metrics_max_idle_secs),
        }
    }
}

/// The shared state the jobs operate on.
#[derive(Clone)]
pub struct Targets {
    pub rate_limiter: Arc<RateLimiter>,
    pub spam_guard: Arc<SpamGuard>,
    pub notices: Arc<NoticeCache>,
    pub registry: Arc<PluginRegistry>,
}

/// Handles of the running jobs.
pub struct Maintenance {
    tasks: Vec<JoinHandle<()>>,
}

impl Maintenance {
    /// Spawns every job. Each first fires one full interval after start.
    pub fn start(schedule: Schedule, targets: Targets, token: &CancellationToken) -> Self {
        let mut tasks = Vec::with_capacity(5);

        let limiter = Arc::clone(&targets.rate_limiter);
        tasks.push(every("limiter_sweep", schedule.limiter_sweep, token, move || {
            let limiter = Arc::clone(&limiter);
            async move {
                limiter.sweep();
            }
        }));

        let guard = Arc::clone(&targets.spam_guard);
        tasks.push(every("spam_sweep", schedule.spam_sweep, token, move || {
            let guard = Arc::clone(&guard);
            async move {
                guard.sweep();
            }
        }));

        let notices = Arc::clone(&targets.notices);
        tasks.push(every("notice_clear", schedule.notice_clear, token, move || {
            let notices = Arc::clone(&notices);
            async move { notices.clear() }
        }));

        let registry = Arc::clone(&targets.registry);
        tasks.push(every("health_sweep", schedule.health_check, token, move || {
            let registry = Arc::clone(&registry);
            async move {
                registry.health_sweep().await;
            }
        }));

        let registry = Arc::clone(&targets.registry);
        let max_idle = schedule.metrics_max_idle;
        tasks.push(every("metrics_cleanup", schedule.metrics_cleanup, token, move || {
            let registry = Arc::clone(&registry);
            async move {
                registry.cleanup_metrics(max_idle);
            }
        }));

        info!(jobs = tasks.len(), "Maintenance tasks started");
        Self { tasks }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every job to observe cancellation.
    pub async fn join(self) {
        for task in futures::future::join_all(self.tasks).await {
            if let Err(e) = task {
                debug!(error = %e, "Maintenance task ended abnormally");
            }
        }
    }
}

fn every<F, Fut>(
    job: &'static str,
    period: Duration,
    token: &CancellationToken,
    mut run: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = token.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(job, "Maintenance task stopped");
                    break;
                }
                _ = ticker.tick() => {
                    debug!(job, "Running maintenance task");
                    run().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule {
            limiter_sweep: Duration::from_secs(120),
            spam_sweep: Duration::from_secs(120),
            notice_clear: Duration::from_secs(30),
            health_check: Duration::from_secs(30),
            metrics_cleanup: Duration::from_secs(3600),
            metrics_max_idle: Duration::from_secs(86_400),
        }
    }

    fn targets() -> Targets {
        Targets {
            rate_limiter: Arc::new(RateLimiter::default()),
            spam_guard: Arc::new(SpamGuard::default()),
            notices: Arc::new(NoticeCache::default()),
            registry: Arc::new(PluginRegistry::builder().build()),
        }
    }

    #[test]
    fn schedule_reads_config() {
        let schedule = Schedule::from_config(&KestrelConfig::default());
        assert_eq!(schedule.limiter_sweep, Duration::from_secs(300));
        assert_eq!(schedule.notice_clear, Duration::from_secs(1800));
        assert_eq!(schedule.metrics_max_idle, Duration::from_secs(86_400));
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_fire_on_their_intervals() {
        let targets = targets();
        targets.notices.should_notify("62811");
        targets.rate_limiter.is_rate_limited("62811");

        let token = CancellationToken::new();
        let maintenance = Maintenance::start(schedule(), targets.clone(), &token);
        assert_eq!(maintenance.len(), 5);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(targets.notices.is_empty());
        assert_eq!(targets.rate_limiter.tracked(), 1);

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(targets.rate_limiter.tracked(), 0);

        token.cancel();
        maintenance.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_jobs() {
        let targets = targets();
        let token = CancellationToken::new();
        let maintenance = Maintenance::start(schedule(), targets.clone(), &token);

        token.cancel();
        maintenance.join().await;

        targets.notices.should_notify("62811");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(targets.notices.len(), 1);
    }
}
