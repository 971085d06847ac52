//! Plugin system.
//!
//! # Architecture
//!
//! A plugin is a [`PluginManifest`] (name, aliases, permission flags,
//! dependencies, opaque config) paired with a compiled-in [`CommandPlugin`]
//! handler object. File-backed plugins are `*.toml` manifests whose
//! `handler` field selects a factory in the [`HandlerCatalog`]; code-defined
//! plugins are registered directly with
//! [`PluginRegistry::register_builtin`].
//!
//! ```text
//! plugins/*.toml ──▶ SafetyScreen ──▶ PluginManifest ──▶ deps check
//!                                                            │
//!                          HandlerCatalog::instantiate ◀─────┘
//!                                     │
//!                                     ▼
//!                              PluginRegistry ──▶ ExecutionSupervisor
//! ```
//!
//! # Quick start
//!
//! ```rust,ignore
//! let mut catalog = HandlerCatalog::new();
//! catalog.register_default::<Ping>("ping");
//!
//! let registry = Arc::new(
//!     PluginRegistry::builder()
//!         .catalog(catalog)
//!         .plugin_dir("plugins")
//!         .build(),
//! );
//! registry.load_all().await;
//! registry.enable_all().await;
//! ```

pub mod builtin;
pub mod catalog;
pub mod core;
pub mod deps;
pub mod health;
pub mod manifest;
pub mod registry;
pub mod screen;
pub mod supervisor;
pub mod watch;

pub use builtin::{GeneratedPluginStore, GeneratedRecord, ReplyPlugin, install_management};
pub use catalog::{HandlerCatalog, HandlerFactory, REPLY_KIND};
pub use core::{BoxedPlugin, CommandPlugin, HealthProbe};
pub use deps::Capabilities;
pub use health::{
    DisableReason, ExecutionMetrics, HealthRecord, HealthStatus, LifecycleState, RuntimeRecord,
};
pub use manifest::{PluginManifest, is_valid_name};
pub use registry::{
    Admission, LoadReport, PluginChange, PluginInfo, PluginRegistry, PluginSnapshot,
    RegistryBuilder, RegistryStats, ReloadReport,
};
pub use screen::SafetyScreen;
pub use supervisor::{ExecutionOutcome, ExecutionSupervisor};
#[cfg(feature = "watch")]
pub use watch::PluginWatcher;
pub use watch::sync_path;
