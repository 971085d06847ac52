//! Configuration schema definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use kestrel_adapter_whatsapp::NormalizerConfig;
use kestrel_framework::{DestinationPolicy, DispatchConfig, Notices};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KestrelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Command parsing and admission policy.
    #[serde(default)]
    pub bot: BotConfig,

    /// Limiter windows, cache sizes and sweep intervals.
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl KestrelConfig {
    /// Settings for the message normalizer.
    pub fn normalizer(&self) -> NormalizerConfig {
        NormalizerConfig {
            prefixes: self.bot.prefixes.clone(),
            require_prefix: self.bot.require_prefix,
            correlation_capacity: self.limits.correlation_capacity,
        }
    }

    /// Policy switches for the dispatch pipeline.
    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            owners: self.bot.owners.clone(),
            destination: self.bot.destination,
            enable_rate_limit: self.bot.enable_rate_limit,
            enable_anti_spam: self.bot.enable_anti_spam,
            log_blocked: self.bot.log_blocked,
            notices: self.bot.notices.clone(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Where log lines are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Daily-rolling files under `logging.file_dir`.
    File,
}

/// Span lifecycle events to log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,

    /// Directory for rolling log files.
    pub file_dir: PathBuf,
    /// File name prefix; files are named `<prefix>.<date>`.
    pub file_prefix: String,
    /// Rotated files kept on disk.
    pub max_files: usize,

    pub span_events: SpanEventConfig,
    pub thread_ids: bool,
    /// Include source file and line number.
    pub file_location: bool,

    /// Per-target overrides, e.g. `kestrel_framework = "debug"`.
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_dir: PathBuf::from("logs"),
            file_prefix: "kestrel.log".to_string(),
            max_files: 7,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            filters: BTreeMap::new(),
        }
    }
}

// =============================================================================
// Bot
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Command prefixes, tried in order.
    pub prefixes: Vec<String>,
    pub require_prefix: bool,
    /// Primary owner numbers.
    pub owners: Vec<String>,
    /// Chats commands are accepted in.
    pub destination: DestinationPolicy,
    pub enable_rate_limit: bool,
    pub enable_anti_spam: bool,
    pub log_blocked: bool,
    /// Rejection reply templates.
    pub notices: Notices,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            prefixes: vec![".".into(), "!".into(), "#".into()],
            require_prefix: true,
            owners: Vec::new(),
            destination: DestinationPolicy::Both,
            enable_rate_limit: true,
            enable_anti_spam: true,
            log_blocked: true,
            notices: Notices::default(),
        }
    }
}

// =============================================================================
// Limits
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Minimum spacing between two commands from one sender.
    pub rate_window_ms: u64,
    pub spam_window_ms: u64,
    /// Messages within `spam_window_ms` beyond which a sender is spamming.
    pub spam_threshold: usize,
    pub limiter_sweep_secs: u64,
    pub spam_sweep_secs: u64,
    pub notice_cache_cap: usize,
    pub notice_clear_secs: u64,
    pub correlation_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_window_ms: 3000,
            spam_window_ms: 10_000,
            spam_threshold: 5,
            limiter_sweep_secs: 300,
            spam_sweep_secs: 300,
            notice_cache_cap: 5000,
            notice_clear_secs: 1800,
            correlation_capacity: 10_000,
        }
    }
}

impl LimitsConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn spam_window(&self) -> Duration {
        Duration::from_millis(self.spam_window_ms)
    }
}

// =============================================================================
// Plugins
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub core_dir: PathBuf,
    pub custom_dir: Option<PathBuf>,
    /// Target of the `addplugin` command.
    pub generated_dir: PathBuf,
    /// Reload plugins when their manifests change on disk.
    pub watch: bool,
    pub watch_debounce_ms: u64,
    pub max_execution_ms: u64,
    /// Consecutive failures tolerated before a plugin is disabled.
    pub failure_threshold: u32,
    pub health_check_secs: u64,
    pub metrics_cleanup_secs: u64,
    pub metrics_max_idle_secs: u64,
    pub security_checks: bool,
    /// Extra regexes rejected in manifest text.
    pub deny_patterns: Vec<String>,
    /// File names skipped during discovery.
    pub excluded_files: Vec<String>,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            core_dir: PathBuf::from("plugins"),
            custom_dir: None,
            generated_dir: PathBuf::from("plugins/generated"),
            watch: true,
            watch_debounce_ms: 500,
            max_execution_ms: 10_000,
            failure_threshold: 5,
            health_check_secs: 30,
            metrics_cleanup_secs: 3600,
            metrics_max_idle_secs: 86_400,
            security_checks: true,
            deny_patterns: Vec::new(),
            excluded_files: Vec::new(),
        }
    }
}

impl PluginsConfig {
    /// Every directory plugins are discovered in. The generated directory
    /// is skipped when it already lies inside another one.
    pub fn dirs(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.core_dir.clone()];
        if let Some(custom) = &self.custom_dir {
            dirs.push(custom.clone());
        }
        if !dirs.iter().any(|d| self.generated_dir.starts_with(d)) {
            dirs.push(self.generated_dir.clone());
        }
        dirs
    }

    pub fn max_execution(&self) -> Duration {
        Duration::from_millis(self.max_execution_ms)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }
}

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StorageConfig {
    pub fn blocklist_path(&self) -> PathBuf {
        self.data_dir.join("blocklist.json")
    }

    pub fn owner_path(&self) -> PathBuf {
        self.data_dir.join("owner.json")
    }

    pub fn premium_path(&self) -> PathBuf {
        self.data_dir.join("premium.json")
    }

    pub fn generated_records_path(&self) -> PathBuf {
        self.data_dir.join("generated_plugins.json")
    }

    pub fn action_log_path(&self) -> PathBuf {
        self.data_dir.join("plugin_actions.log")
    }
}
