//! # Kestrel
//!
//! A command-oriented chat bot runtime: raw chat events are normalised,
//! screened and routed to hot-reloadable command plugins.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌──────────────────────────────┐   ┌──────────────┐
//! │ raw event │──▶│ Normalizer │──▶│ Dispatcher                   │──▶│  Supervisor  │──▶ plugin
//! └───────────┘   └────────────┘   │ blocklist · rate · spam ·    │   │ timeout and  │
//!                                  │ destination · resolve · auth │   │ auto-disable │
//!                                  └──────────────────────────────┘   └──────────────┘
//! ```
//!
//! - **Runtime**: configuration, logging, maintenance, hot reload, event loop
//! - **Adapter**: turns multi-device chat events into canonical messages
//! - **Framework**: admission control, the plugin registry and execution
//! - **Plugins**: TOML manifests bound to compiled handler kinds
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kestrel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = KestrelRuntime::builder()
//!         .transport(MyTransport::new())
//!         .handler("weather", |m| Ok(Arc::new(Weather::from_manifest(m)?) as BoxedPlugin))
//!         .build()?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::channel(256);
//!     spawn_connection(tx);
//!     runtime.run(rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines
//! - `watch` *(default)*: reload plugins when their manifests change

pub use kestrel_adapter_whatsapp as whatsapp;
pub use kestrel_core as core;
pub use kestrel_framework as framework;
pub use kestrel_runtime as runtime;

/// Commonly used types for building a bot.
///
/// ```rust,ignore
/// use kestrel::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use kestrel_runtime::{KestrelConfig, KestrelRuntime, RuntimeBuilder};

    // Plugins
    pub use kestrel_framework::{
        BoxedPlugin, CommandPlugin, ExecutionContext, HandlerCatalog, HealthProbe,
        PluginManifest, RegisterContext,
    };

    // Messages and capabilities
    pub use kestrel_core::{
        AccessOracle, BoxError, BoxedTransport, CanonicalMessage, SendOptions, Transport,
        TransportError, TransportResult,
    };

    // Dispatch results
    pub use kestrel_framework::{DispatchOutcome, ExecutionOutcome};
}
