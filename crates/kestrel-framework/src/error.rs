//! Error types for the Kestrel framework.

use std::path::PathBuf;

use thiserror::Error;

/// Reasons a plugin could not be loaded, enabled or managed.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin with this name is registered.
    #[error("plugin '{0}' not found")]
    NotFound(String),

    /// A plugin with this name is already registered.
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// The plugin name is not lowercase `[a-z0-9_-]+`.
    #[error("invalid plugin name '{0}': use lowercase letters, digits, '_' or '-'")]
    InvalidName(String),

    /// The manifest is structurally invalid.
    #[error("invalid manifest {path}: {reason}")]
    InvalidManifest {
        /// Manifest location.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The manifest is not valid TOML or has fields of the wrong type.
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        /// Manifest location.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// The manifest names a handler kind the catalog does not provide.
    #[error("plugin '{plugin}' requests unknown handler '{handler}'")]
    UnknownHandler {
        /// Plugin name.
        plugin: String,
        /// Requested handler kind.
        handler: String,
    },

    /// The source text matched a denied pattern.
    #[error("plugin source {path} rejected by safety screen: matches `{pattern}`")]
    SecurityViolation {
        /// Manifest location.
        path: PathBuf,
        /// The pattern that matched.
        pattern: String,
    },

    /// A declared dependency is missing or has an incompatible version.
    #[error("plugin '{plugin}' requires {dependency} {requirement}, found {}", .found.as_deref().unwrap_or("nothing"))]
    UnsatisfiedDependency {
        /// Plugin name.
        plugin: String,
        /// Dependency name.
        dependency: String,
        /// Required version range.
        requirement: String,
        /// Version that is available, if any.
        found: Option<String>,
    },

    /// The plugin's `register` hook failed.
    #[error("plugin '{plugin}' failed to register: {reason}")]
    RegisterFailed {
        /// Plugin name.
        plugin: String,
        /// Error reported by the hook.
        reason: String,
    },

    /// The operation needs a file-backed plugin.
    #[error("plugin '{0}' is not backed by a file")]
    NotFileBacked(String),

    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl PluginError {
    /// Creates an invalid-manifest error.
    pub fn invalid_manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether loading might succeed later, once other plugins are loaded.
    pub fn is_dependency_error(&self) -> bool {
        matches!(self, Self::UnsatisfiedDependency { .. })
    }
}

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised by the durable blocklist.
#[derive(Debug, Error)]
pub enum BlocklistError {
    #[error("failed to access blocklist file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blocklist file {path} is not a JSON array of strings: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
