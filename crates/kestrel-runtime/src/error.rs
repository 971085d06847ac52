//! Runtime error types.

use std::path::PathBuf;

use kestrel_framework::PluginError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while starting or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The global subscriber or log file could not be set up.
    #[error("Failed to initialise logging: {0}")]
    Logging(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// The plugin directory watcher could not start.
    #[error("Failed to watch plugin directories: {0}")]
    Watch(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RuntimeError {
    pub fn logging(message: impl ToString) -> Self {
        Self::Logging(message.to_string())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
