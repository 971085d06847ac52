//! # Kestrel Framework
//!
//! The command layer of the Kestrel bot runtime.
//!
//! This layer provides:
//! - Admission control: per-identity rate limiting and spam detection, a
//!   durable blocklist and de-duplicated destination notices
//! - The plugin system: manifests, a handler catalog, the registry with its
//!   lifecycle, health and metrics, and hot observation of plugin files
//! - Bounded execution through the [`ExecutionSupervisor`]
//! - The [`Dispatcher`] that chains all of the above for every message
//!
//! Everything here is transport-agnostic; messages arrive as
//! [`CanonicalMessage`](kestrel_core::CanonicalMessage)s and replies leave
//! through their bound reply handle.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod resolve;
pub mod security;

pub use context::{ExecutionContext, RegisterContext, ServiceArc, Services};
pub use dispatcher::{
    DestinationPolicy, DispatchConfig, DispatchOutcome, Dispatcher, DispatcherBuilder, Notices,
    Tier,
};
pub use error::{BlocklistError, PluginError, PluginResult};
pub use plugin::{
    Admission, BoxedPlugin, Capabilities, CommandPlugin, DisableReason, ExecutionMetrics,
    ExecutionOutcome, ExecutionSupervisor, GeneratedPluginStore, HandlerCatalog, HealthProbe,
    HealthStatus, LifecycleState, PluginChange, PluginInfo, PluginManifest, PluginRegistry,
    PluginSnapshot, RegistryStats, ReplyPlugin, SafetyScreen, install_management, sync_path,
};
#[cfg(feature = "watch")]
pub use plugin::PluginWatcher;
pub use resolve::suggest;
pub use security::{Blocklist, NoticeCache, RateLimiter, SpamGuard, SpamStats};
