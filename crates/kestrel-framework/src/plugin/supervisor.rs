//! Bounded plugin execution.
//!
//! [`ExecutionSupervisor::run`] is the only way the dispatcher invokes a
//! handler. The handler runs in its own task raced against a timeout; errors,
//! panics and timeouts all come back as an unsuccessful
//! [`ExecutionOutcome`], never as a propagated error.
//!
//! A timed-out handler is not cancelled. Its task keeps running detached and
//! whatever it returns later is ignored.

use std::sync::Arc;
use std::time::Duration;

use kestrel_core::{BoxedTransport, CanonicalMessage};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::health::DisableReason;
use super::registry::{Admission, PluginRegistry, PluginSnapshot};
use crate::context::ExecutionContext;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Result of one supervised invocation.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time: Duration,
    /// Whether this attempt pushed the plugin over the failure threshold.
    pub auto_disabled: bool,
}

impl ExecutionOutcome {
    fn ok(result: Value, execution_time: Duration) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            execution_time,
            auto_disabled: false,
        }
    }

    fn failed(error: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            execution_time,
            auto_disabled: false,
        }
    }
}

pub struct ExecutionSupervisor {
    registry: Arc<PluginRegistry>,
    timeout: Duration,
    failure_threshold: u32,
}

impl ExecutionSupervisor {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// A plugin is disabled once its consecutive failures exceed `threshold`.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Runs `plugin` for `msg` and updates its health and metrics.
    pub async fn run(
        &self,
        plugin: &PluginSnapshot,
        msg: Arc<CanonicalMessage>,
        transport: BoxedTransport,
        ctx: Arc<ExecutionContext>,
    ) -> ExecutionOutcome {
        let name = plugin.name.as_str();
        match self.registry.admit(name) {
            Admission::Ready => {}
            Admission::Inactive => {
                debug!(plugin = %name, "Refusing to run inactive plugin");
                return ExecutionOutcome::failed("plugin is not active", Duration::ZERO);
            }
            Admission::Critical => {
                debug!(plugin = %name, "Refusing to run plugin in critical health");
                let outcome = ExecutionOutcome::failed("plugin health is critical", Duration::ZERO);
                return self.fail(name, outcome).await;
            }
        }

        let started = Instant::now();
        let handler = Arc::clone(&plugin.handler);
        let task = tokio::spawn(async move {
            handler
                .execute(&msg, &transport, &ctx)
                .await
                .map_err(|e| e.to_string())
        });

        let joined = tokio::time::timeout(self.timeout, task).await;
        let elapsed = started.elapsed();
        let outcome = match joined {
            Ok(Ok(Ok(value))) => ExecutionOutcome::ok(value, elapsed),
            Ok(Ok(Err(e))) => ExecutionOutcome::failed(e, elapsed),
            Ok(Err(join)) if join.is_panic() => ExecutionOutcome::failed("handler panicked", elapsed),
            Ok(Err(join)) => ExecutionOutcome::failed(join.to_string(), elapsed),
            Err(_) => ExecutionOutcome::failed(
                format!("execution timed out after {:?}", self.timeout),
                elapsed,
            ),
        };

        if outcome.success {
            self.registry.record_success(name, elapsed);
            debug!(plugin = %name, elapsed = ?elapsed, "Plugin executed");
            outcome
        } else {
            self.fail(name, outcome).await
        }
    }

    async fn fail(&self, name: &str, mut outcome: ExecutionOutcome) -> ExecutionOutcome {
        let error = outcome.error.as_deref().unwrap_or("unknown error");
        let consecutive = self
            .registry
            .record_failure(name, outcome.execution_time, error);
        warn!(
            plugin = %name,
            error = %error,
            consecutive,
            elapsed = ?outcome.execution_time,
            "Plugin execution failed"
        );

        if consecutive > self.failure_threshold {
            match self
                .registry
                .disable_with(name, DisableReason::ExcessiveFailures)
                .await
            {
                Ok(true) => {
                    warn!(plugin = %name, consecutive, "Plugin auto-disabled after repeated failures");
                    outcome.auto_disabled = true;
                }
                Ok(false) => {}
                Err(e) => warn!(plugin = %name, error = %e, "Failed to auto-disable plugin"),
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use kestrel_core::{BoxError, ReplyHandle, SendOptions, Transport, TransportResult};

    use super::*;
    use crate::context::{RegisterContext, Services};
    use crate::plugin::core::CommandPlugin;
    use crate::plugin::health::HealthStatus;
    use crate::plugin::manifest::PluginManifest;

    struct Null;

    #[async_trait]
    impl Transport for Null {
        async fn send(&self, _: &str, _: &str, _: SendOptions) -> TransportResult<()> {
            Ok(())
        }
    }

    enum Behaviour {
        Succeed,
        Fail,
        Panic,
        Hang,
    }

    struct Scripted(Behaviour);

    #[async_trait]
    impl CommandPlugin for Scripted {
        async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
            Ok(())
        }

        async fn execute(
            &self,
            _msg: &CanonicalMessage,
            _transport: &BoxedTransport,
            _ctx: &ExecutionContext,
        ) -> Result<Value, BoxError> {
            match self.0 {
                Behaviour::Succeed => Ok(Value::from("done")),
                Behaviour::Fail => Err("nope".into()),
                Behaviour::Panic => panic!("handler bug"),
                Behaviour::Hang => std::future::pending().await,
            }
        }
    }

    async fn setup(behaviour: Behaviour) -> (ExecutionSupervisor, PluginSnapshot) {
        let registry = Arc::new(PluginRegistry::default());
        registry
            .register_builtin(PluginManifest::new("t"), Arc::new(Scripted(behaviour)))
            .unwrap();
        registry.enable("t").await.unwrap();
        let snapshot = registry.resolve("t").unwrap();
        (ExecutionSupervisor::new(registry), snapshot)
    }

    async fn invoke(sup: &ExecutionSupervisor, plugin: &PluginSnapshot) -> ExecutionOutcome {
        let transport: BoxedTransport = Arc::new(Null);
        let msg = Arc::new(CanonicalMessage::new(
            "id",
            "1@s.whatsapp.net",
            "1@s.whatsapp.net",
            ReplyHandle::new(transport.clone(), "1@s.whatsapp.net", None),
        ));
        let ctx = Arc::new(ExecutionContext::new(
            &plugin.name,
            msg.clone(),
            Arc::new(Value::Null),
            Arc::new(Services::new()),
        ));
        sup.run(plugin, msg, transport, ctx).await
    }

    #[tokio::test]
    async fn success_records_metrics() {
        let (sup, plugin) = setup(Behaviour::Succeed).await;
        let outcome = invoke(&sup, &plugin).await;
        assert!(outcome.success);
        assert_eq!(outcome.result, Some(Value::from("done")));

        let info = sup.registry().info("t").unwrap();
        assert_eq!(info.metrics.executions, 1);
        assert_eq!(info.health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let (sup, plugin) = setup(Behaviour::Panic).await;
        let outcome = invoke(&sup, &plugin).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("handler panicked"));
    }

    #[tokio::test]
    async fn auto_disables_after_six_consecutive_failures() {
        let (sup, plugin) = setup(Behaviour::Fail).await;
        for attempt in 1..=6 {
            let outcome = invoke(&sup, &plugin).await;
            assert!(!outcome.success);
            assert_eq!(outcome.auto_disabled, attempt == 6, "attempt {attempt}");
            if attempt < 6 {
                assert!(sup.registry().is_active("t"));
            }
        }
        assert!(!sup.registry().is_active("t"));
        assert!(sup.registry().contains("t"));
        assert_eq!(sup.registry().health("t"), Some(HealthStatus::Disabled));

        let refused = invoke(&sup, &plugin).await;
        assert_eq!(refused.error.as_deref(), Some("plugin is not active"));
        assert_eq!(sup.registry().info("t").unwrap().metrics.executions, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_handler_times_out_on_schedule() {
        let (sup, plugin) = setup(Behaviour::Hang).await;
        let sup = sup.with_timeout(Duration::from_secs(2));

        let started = Instant::now();
        let outcome = invoke(&sup, &plugin).await;
        let waited = started.elapsed();

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
        assert!(waited >= Duration::from_secs(2));
        assert!(waited < Duration::from_millis(2100));
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_log_carries_full_duration() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (sup, plugin) = setup(Behaviour::Hang).await;
        let sup = sup.with_timeout(Duration::from_millis(1500));
        let outcome = invoke(&sup, &plugin).await;
        assert_eq!(outcome.error.as_deref(), Some("execution timed out after 1.5s"));

        let logs = String::from_utf8(captured.0.lock().clone()).unwrap();
        let line = logs
            .lines()
            .find(|l| l.contains("Plugin execution failed"))
            .unwrap();
        assert!(line.contains("elapsed=1.5"), "{line}");
    }
}
