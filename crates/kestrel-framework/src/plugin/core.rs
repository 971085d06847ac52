use std::sync::Arc;

use async_trait::async_trait;
use kestrel_core::{BoxError, BoxedTransport, CanonicalMessage};
use serde_json::Value;

use crate::context::{ExecutionContext, RegisterContext};

// ─── HealthProbe ─────────────────────────────────────────────────────────────

/// Result of a plugin's own health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub healthy: bool,
    pub error: Option<String>,
}

impl HealthProbe {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
        }
    }
}

// ─── CommandPlugin ───────────────────────────────────────────────────────────

/// The contract every command handler satisfies.
///
/// Metadata (name, aliases, permission flags) lives in the plugin's
/// [`PluginManifest`](crate::PluginManifest); this trait only carries
/// behaviour. The registry keeps the handler behind an `Arc` and hands the
/// supervisor a snapshot per call, so a reload never interrupts a running
/// `execute`.
///
/// # Example
///
/// ```rust,ignore
/// struct Ping;
///
/// #[async_trait]
/// impl CommandPlugin for Ping {
///     async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
///         Ok(())
///     }
///
///     async fn execute(
///         &self,
///         msg: &CanonicalMessage,
///         _transport: &BoxedTransport,
///         _ctx: &ExecutionContext,
///     ) -> Result<Value, BoxError> {
///         msg.reply("pong").await;
///         Ok(Value::Null)
///     }
/// }
/// ```
#[async_trait]
pub trait CommandPlugin: Send + Sync + 'static {
    /// Called when the plugin is enabled.
    async fn register(&self, ctx: &RegisterContext) -> Result<(), BoxError>;

    /// Handles one command invocation.
    async fn execute(
        &self,
        msg: &CanonicalMessage,
        transport: &BoxedTransport,
        ctx: &ExecutionContext,
    ) -> Result<Value, BoxError>;

    /// Called when the plugin is disabled or unloaded. Failures are logged.
    async fn deactivate(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Optional self-check polled by the periodic health sweep.
    async fn health_check(&self) -> Option<HealthProbe> {
        None
    }
}

/// A shareable handler object.
pub type BoxedPlugin = Arc<dyn CommandPlugin>;
