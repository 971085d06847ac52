//! Configuration for the Kestrel runtime.
//!
//! Layered loading (defaults, profile file, main file, environment) lives in
//! [`loader`]; the typed schema in [`schema`]; [`validation`] rejects values
//! the runtime cannot operate with.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, KestrelConfig, LimitsConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    PluginsConfig, SpanEventConfig, StorageConfig,
};
pub use validation::validate_config;
