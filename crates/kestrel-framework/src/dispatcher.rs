//! Command dispatch pipeline.
//!
//! [`Dispatcher::dispatch`] takes one canonical message through a fixed
//! admission chain and stops at the first rejection:
//!
//! 1. not a command: dropped silently
//! 2. blocked sender: dropped silently
//! 3. rate limit (primary owners exempt): one wait notice
//! 4. anti-spam (primary owners exempt): one cooldown notice
//! 5. destination policy (primary owners exempt): one notice per identity
//!    per epoch
//! 6. resolution by name or alias: "not found" notice with a suggestion
//! 7. owner / premium authorization: one notice
//! 8. supervised execution: one generic notice if it fails
//!
//! Every rejection produces at most one reply. The result of each dispatch
//! is returned as a [`DispatchOutcome`] so callers and tests can see where a
//! message stopped.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use kestrel_core::{BoxedAccessOracle, CanonicalMessage, NoAccess};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::context::{ExecutionContext, Services};
use crate::plugin::{ExecutionOutcome, ExecutionSupervisor, PluginRegistry};
use crate::resolve::suggest;
use crate::security::{Blocklist, NoticeCache, RateLimiter, SpamGuard};

// =============================================================================
// Configuration
// =============================================================================

/// Chat kinds the bot answers commands in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationPolicy {
    #[default]
    Both,
    Group,
    Private,
}

impl DestinationPolicy {
    pub fn admits(&self, is_group: bool) -> bool {
        match self {
            Self::Both => true,
            Self::Group => is_group,
            Self::Private => !is_group,
        }
    }

    /// Human-readable name of the chats this policy admits.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Both => "all chats",
            Self::Group => "groups",
            Self::Private => "private chats",
        }
    }
}

/// Reply templates for rejections.
///
/// Placeholders: `{seconds}`, `{command}`, `{suggestion}`, `{label}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Notices {
    pub rate_limited: String,
    pub spamming: String,
    pub destination: String,
    pub not_found: String,
    /// Appended to `not_found` when a suggestion exists.
    pub suggestion: String,
    pub disabled: String,
    pub owner_only: String,
    pub premium_only: String,
    pub failure: String,
}

impl Default for Notices {
    fn default() -> Self {
        Self {
            rate_limited: "⏳ Please wait {seconds} seconds before sending another command.".into(),
            spamming: "🚫 Too many messages. Please wait {seconds} seconds.".into(),
            destination: "⚠️ The bot currently only accepts commands in *{label}*. Please contact the owner.".into(),
            not_found: "❌ Command *{command}* not found.".into(),
            suggestion: "\n\nDid you mean *{suggestion}*?".into(),
            disabled: "⚠️ Command *{command}* is currently disabled.".into(),
            owner_only: "❌ This command is for the *owner* only.".into(),
            premium_only: "❌ This command is for *premium* users only.".into(),
            failure: "⚠️ Something went wrong while running this command.".into(),
        }
    }
}

fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("{{{key}}}"), value)
    })
}

/// Policy switches for the admission chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Primary owner numbers. Exempt from rate, spam and destination checks.
    pub owners: Vec<String>,
    pub destination: DestinationPolicy,
    pub enable_rate_limit: bool,
    pub enable_anti_spam: bool,
    /// Log dropped messages from blocked senders at `info`.
    pub log_blocked: bool,
    pub notices: Notices,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
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
// Outcome
// =============================================================================

/// Authorization tier a command requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Owner,
    Premium,
}

/// Where a message left the pipeline.
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    NotCommand,
    Blocked,
    RateLimited { wait_secs: u64 },
    Spamming { cooldown_secs: u64 },
    DestinationRejected { notified: bool },
    NotFound { suggestion: Option<String> },
    /// The command exists but its plugin is not active.
    Unavailable { plugin: String },
    Unauthorized(Tier),
    Executed { plugin: String, outcome: ExecutionOutcome },
}

impl DispatchOutcome {
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed { .. })
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

pub struct DispatcherBuilder {
    registry: Arc<PluginRegistry>,
    config: DispatchConfig,
    rate_limiter: Arc<RateLimiter>,
    spam_guard: Arc<SpamGuard>,
    blocklist: Arc<Blocklist>,
    notices: Arc<NoticeCache>,
    oracle: BoxedAccessOracle,
    timeout: Option<Duration>,
    failure_threshold: Option<u32>,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn spam_guard(mut self, guard: Arc<SpamGuard>) -> Self {
        self.spam_guard = guard;
        self
    }

    pub fn blocklist(mut self, blocklist: Arc<Blocklist>) -> Self {
        self.blocklist = blocklist;
        self
    }

    pub fn notice_cache(mut self, cache: Arc<NoticeCache>) -> Self {
        self.notices = cache;
        self
    }

    pub fn oracle(mut self, oracle: BoxedAccessOracle) -> Self {
        self.oracle = oracle;
        self
    }

    /// Execution timeout handed to the supervisor.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut supervisor = ExecutionSupervisor::new(Arc::clone(&self.registry));
        if let Some(timeout) = self.timeout {
            supervisor = supervisor.with_timeout(timeout);
        }
        if let Some(threshold) = self.failure_threshold {
            supervisor = supervisor.with_failure_threshold(threshold);
        }
        let owners = self
            .config
            .owners
            .iter()
            .map(|o| Blocklist::normalize(o))
            .filter(|o| !o.is_empty())
            .collect();

        Dispatcher {
            owners,
            config: self.config,
            services: Arc::clone(self.registry.services()),
            registry: self.registry,
            supervisor,
            rate_limiter: self.rate_limiter,
            spam_guard: self.spam_guard,
            blocklist: self.blocklist,
            notices: self.notices,
            oracle: self.oracle,
        }
    }
}

pub struct Dispatcher {
    config: DispatchConfig,
    owners: HashSet<String>,
    registry: Arc<PluginRegistry>,
    supervisor: ExecutionSupervisor,
    services: Arc<Services>,
    rate_limiter: Arc<RateLimiter>,
    spam_guard: Arc<SpamGuard>,
    blocklist: Arc<Blocklist>,
    notices: Arc<NoticeCache>,
    oracle: BoxedAccessOracle,
}

impl Dispatcher {
    /// A dispatcher over `registry` with default policies and in-memory state.
    pub fn builder(registry: Arc<PluginRegistry>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            config: DispatchConfig::default(),
            rate_limiter: Arc::new(RateLimiter::default()),
            spam_guard: Arc::new(SpamGuard::default()),
            blocklist: Arc::new(Blocklist::in_memory()),
            notices: Arc::new(NoticeCache::default()),
            oracle: Arc::new(NoAccess),
            timeout: None,
            failure_threshold: None,
        }
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Whether `number` is a configured primary owner.
    pub fn is_primary_owner(&self, number: &str) -> bool {
        self.owners.contains(&Blocklist::normalize(number))
    }

    /// Runs the admission chain for `msg`.
    pub async fn dispatch(&self, msg: CanonicalMessage) -> DispatchOutcome {
        if !msg.is_cmd || msg.command.is_empty() {
            return DispatchOutcome::NotCommand;
        }
        let msg = Arc::new(msg);
        let sender = msg.sender_number.as_str();
        let notices = &self.config.notices;

        if self.blocklist.is_blocked(sender) {
            if self.config.log_blocked {
                info!(sender = %sender, command = %msg.command, "Dropped command from blocked sender");
            }
            return DispatchOutcome::Blocked;
        }

        let primary_owner = self.is_primary_owner(sender);

        if !primary_owner {
            if self.config.enable_rate_limit && self.rate_limiter.is_rate_limited(sender) {
                let wait_secs = self.rate_limiter.remaining_secs(sender);
                debug!(sender = %sender, wait_secs, "Rate limited");
                let seconds = wait_secs.to_string();
                msg.reply(&render(&notices.rate_limited, &[("seconds", seconds.as_str())]))
                    .await;
                return DispatchOutcome::RateLimited { wait_secs };
            }

            if self.config.enable_anti_spam && self.spam_guard.is_spamming(sender) {
                let cooldown_secs = self.spam_guard.cooldown_secs(sender);
                debug!(sender = %sender, cooldown_secs, "Spam detected");
                let seconds = cooldown_secs.to_string();
                msg.reply(&render(&notices.spamming, &[("seconds", seconds.as_str())]))
                    .await;
                return DispatchOutcome::Spamming { cooldown_secs };
            }

            if !self.config.destination.admits(msg.is_group) {
                let key = if msg.is_group { &msg.chat_id } else { &msg.sender_number };
                let notified = self.notices.should_notify(key);
                debug!(sender = %sender, chat = %msg.chat_id, notified, "Destination policy rejected command");
                if notified {
                    let label = self.config.destination.label();
                    msg.reply(&render(&notices.destination, &[("label", label)]))
                        .await;
                }
                return DispatchOutcome::DestinationRejected { notified };
            }
        }

        let typed = format!("{}{}", msg.prefix, msg.command);
        let Some(plugin) = self.registry.resolve(&msg.command) else {
            let suggestion = suggest(&msg.command, self.registry.names_and_aliases());
            debug!(command = %msg.command, suggestion = ?suggestion, "Unknown command");
            let mut text = render(&notices.not_found, &[("command", typed.as_str())]);
            if let Some(s) = &suggestion {
                let suggested = format!("{}{s}", msg.prefix);
                text.push_str(&render(&notices.suggestion, &[("suggestion", suggested.as_str())]));
            }
            msg.reply(&text).await;
            return DispatchOutcome::NotFound { suggestion };
        };

        if !self.registry.is_active(&plugin.name) {
            debug!(plugin = %plugin.name, "Command resolved to inactive plugin");
            msg.reply(&render(&notices.disabled, &[("command", typed.as_str())]))
                .await;
            return DispatchOutcome::Unavailable {
                plugin: plugin.name,
            };
        }

        let is_owner = primary_owner || self.oracle.is_owner(sender).await;
        let is_premium = is_owner || self.oracle.is_premium(sender).await;
        if plugin.manifest.owner_only && !is_owner {
            debug!(plugin = %plugin.name, sender = %sender, "Owner-only command refused");
            msg.reply(&notices.owner_only).await;
            return DispatchOutcome::Unauthorized(Tier::Owner);
        }
        if plugin.manifest.premium_only && !is_premium {
            debug!(plugin = %plugin.name, sender = %sender, "Premium-only command refused");
            msg.reply(&notices.premium_only).await;
            return DispatchOutcome::Unauthorized(Tier::Premium);
        }

        let ctx = Arc::new(
            ExecutionContext::new(
                &plugin.name,
                Arc::clone(&msg),
                Arc::new(plugin.manifest.config.clone()),
                Arc::clone(&self.services),
            )
            .with_access(is_owner, is_premium),
        );
        let transport = Arc::clone(msg.replier().transport());

        let run = self
            .supervisor
            .run(&plugin, Arc::clone(&msg), transport, ctx);
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(plugin = %plugin.name, "Supervisor panicked");
                ExecutionOutcome {
                    success: false,
                    result: None,
                    error: Some("supervisor panicked".to_string()),
                    execution_time: Duration::ZERO,
                    auto_disabled: false,
                }
            }
        };

        if !outcome.success {
            msg.reply(&notices.failure).await;
        }
        DispatchOutcome::Executed {
            plugin: plugin.name,
            outcome,
        }
    }
}
