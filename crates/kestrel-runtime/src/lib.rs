//! Kestrel Runtime - orchestration layer for the Kestrel bot runtime.
//!
//! This crate provides:
//! - Layered configuration loading ([`config::ConfigLoader`], figment)
//! - Logging setup ([`LoggingBuilder`], tracing-subscriber)
//! - File-backed owner and premium lookups ([`FileAccessOracle`])
//! - Periodic housekeeping ([`maintenance`])
//! - The event loop with graceful shutdown ([`KestrelRuntime`])
//!
//! ```rust,ignore
//! use kestrel_runtime::KestrelRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = KestrelRuntime::builder()
//!         .transport(MyTransport::new())
//!         .build()?;
//!
//!     let (tx, rx) = tokio::sync::mpsc::channel(256);
//!     spawn_connection(tx);
//!
//!     // Run until Ctrl+C
//!     runtime.run(rx).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log lines
//! - `watch` *(default)*: reload plugins when their manifests change

pub mod access;
pub mod config;
pub mod error;
pub mod logging;
pub mod maintenance;
pub mod runtime;

pub use access::FileAccessOracle;
pub use config::{ConfigError, ConfigLoader, ConfigResult, KestrelConfig, Profile};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{KestrelRuntime, RuntimeBuilder, RuntimeStats, wait_for_shutdown};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
