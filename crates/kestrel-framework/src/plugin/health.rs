//! Per-plugin lifecycle, health and execution metrics.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Consecutive failures at which health escalates to critical.
pub const CRITICAL_AFTER: u32 = 3;

/// Position on the load/enable axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Unloaded,
    Loaded,
    Enabled,
    Disabled,
}

/// Position on the health axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Disabled,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Disabled => "disabled",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
        })
    }
}

/// Why a plugin left the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    Manual,
    ExcessiveFailures,
}

// ─── HealthRecord ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub last_error: Option<String>,
    pub last_check: Option<Instant>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            status: HealthStatus::Unknown,
            consecutive_errors: 0,
            total_errors: 0,
            last_error: None,
            last_check: None,
        }
    }
}

impl HealthRecord {
    pub fn mark_healthy(&mut self) {
        self.status = HealthStatus::Healthy;
        self.consecutive_errors = 0;
        self.last_check = Some(Instant::now());
    }

    /// Records one failure and escalates: warning first, critical from
    /// [`CRITICAL_AFTER`] consecutive failures.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.consecutive_errors += 1;
        self.total_errors += 1;
        self.last_error = Some(error.into());
        self.last_check = Some(Instant::now());
        self.status = if self.consecutive_errors >= CRITICAL_AFTER {
            HealthStatus::Critical
        } else {
            HealthStatus::Warning
        };
    }

    pub fn mark_disabled(&mut self) {
        self.status = HealthStatus::Disabled;
        self.last_check = Some(Instant::now());
    }
}

// ─── ExecutionMetrics ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_time: Duration,
    pub peak_time: Duration,
    pub last_execution: Option<Instant>,
}

impl ExecutionMetrics {
    pub fn record(&mut self, elapsed: Duration, success: bool) {
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_time += elapsed;
        self.peak_time = self.peak_time.max(elapsed);
        self.last_execution = Some(Instant::now());
    }

    pub fn average_time(&self) -> Duration {
        match u32::try_from(self.executions) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_time / n,
            Err(_) => Duration::from_secs_f64(self.total_time.as_secs_f64() / self.executions as f64),
        }
    }

    /// Percentage of successful executions, 100 when nothing ran yet.
    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            100.0
        } else {
            self.successes as f64 * 100.0 / self.executions as f64
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── RuntimeRecord ───────────────────────────────────────────────────────────

/// Lifecycle timestamps of one plugin.
#[derive(Debug, Clone)]
pub struct RuntimeRecord {
    pub state: LifecycleState,
    pub loaded_at: Instant,
    pub enabled_at: Option<Instant>,
    pub disabled_at: Option<Instant>,
    pub disable_reason: Option<DisableReason>,
}

impl RuntimeRecord {
    pub fn loaded() -> Self {
        Self {
            state: LifecycleState::Loaded,
            loaded_at: Instant::now(),
            enabled_at: None,
            disabled_at: None,
            disable_reason: None,
        }
    }
}
