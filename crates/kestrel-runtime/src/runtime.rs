//! Runtime orchestration.
//!
//! [`KestrelRuntime`] owns every long-lived component: the decoder, the
//! plugin registry, the limiter state, the dispatcher and the background
//! tasks. Raw events go in through [`handle_event`](KestrelRuntime::handle_event)
//! or a channel consumed by [`run_until`](KestrelRuntime::run_until).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use kestrel_runtime::KestrelRuntime;
//!
//! let runtime = KestrelRuntime::builder()
//!     .config_file("kestrel.toml")
//!     .transport(MyTransport::connect().await?)
//!     .handler("weather", |m| Ok(Arc::new(Weather::from_manifest(m)?) as BoxedPlugin))
//!     .build()?;
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(256);
//! // feed raw events into `tx` from the connection
//! runtime.run(rx).await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use kestrel_adapter_whatsapp::WhatsAppDecoder;
use kestrel_core::{
    BoxedAccessOracle, BoxedDecoder, BoxedTransport, CanonicalMessage, EventDecoder, Transport,
};
use kestrel_framework::{
    Blocklist, BoxedPlugin, Capabilities, CommandPlugin, DispatchOutcome, Dispatcher,
    GeneratedPluginStore, HandlerCatalog, NoticeCache, PluginManifest, PluginRegistry,
    RateLimiter, RegistryStats, SafetyScreen, Services, SpamGuard, SpamStats, install_management,
};
use futures::future;
use serde_json::Value;
use tokio::signal;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::access::FileAccessOracle;
use crate::config::{ConfigError, ConfigLoader, KestrelConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;
use crate::maintenance::{Maintenance, Schedule, Targets};

/// Decodes and dispatches raw events. Cheap to clone into tasks.
#[derive(Clone)]
struct EventHandler {
    decoder: BoxedDecoder,
    transport: BoxedTransport,
    dispatcher: Arc<Dispatcher>,
}

impl EventHandler {
    /// Every message carried by `raw`; batches yield one per usable item.
    fn decode(&self, raw: &Value) -> Vec<CanonicalMessage> {
        self.decoder.decode_all(raw, &self.transport)
    }

    async fn handle(&self, raw: &Value) -> Vec<DispatchOutcome> {
        future::join_all(self.decode(raw).into_iter().map(|msg| self.dispatch(msg))).await
    }

    async fn dispatch(&self, msg: CanonicalMessage) -> DispatchOutcome {
        let span = info_span!("event", id = %msg.id, sender = %msg.sender_number);
        self.dispatcher.dispatch(msg).instrument(span).await
    }
}

/// Tasks and handles that exist only between `start` and `shutdown`.
struct Background {
    token: CancellationToken,
    maintenance: Maintenance,
    #[cfg(feature = "watch")]
    watch: Option<(kestrel_framework::PluginWatcher, tokio::task::JoinHandle<()>)>,
}

/// Point-in-time counters across the runtime.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuntimeStats {
    pub running: bool,
    pub plugins: RegistryStats,
    pub blocked: usize,
    pub rate_limited_tracked: usize,
    pub spam: SpamStats,
    pub pending_notices: usize,
}

/// The Kestrel runtime.
pub struct KestrelRuntime {
    config: KestrelConfig,
    handler: EventHandler,
    registry: Arc<PluginRegistry>,
    rate_limiter: Arc<RateLimiter>,
    spam_guard: Arc<SpamGuard>,
    notices: Arc<NoticeCache>,
    blocklist: Arc<Blocklist>,
    background: Mutex<Option<Background>>,
}

impl KestrelRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &KestrelConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.handler.dispatcher
    }

    pub fn blocklist(&self) -> &Arc<Blocklist> {
        &self.blocklist
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn spam_guard(&self) -> &Arc<SpamGuard> {
        &self.spam_guard
    }

    pub async fn is_running(&self) -> bool {
        self.background.lock().await.is_some()
    }

    pub async fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            running: self.is_running().await,
            plugins: self.registry.stats(),
            blocked: self.blocklist.len(),
            rate_limited_tracked: self.rate_limiter.tracked(),
            spam: self.spam_guard.stats(),
            pending_notices: self.notices.len(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Loads and enables every plugin, then starts maintenance and, when
    /// configured, the plugin directory watcher.
    pub async fn start(&self) -> RuntimeResult<()> {
        let mut background = self.background.lock().await;
        if background.is_some() {
            warn!("Runtime is already running");
            return Ok(());
        }

        info!(decoder = self.handler.decoder.name(), "Starting Kestrel runtime");

        let report = self.registry.load_all().await;
        for (path, e) in &report.failed {
            error!(path = %path.display(), error = %e, "Plugin failed to load");
        }
        let enabled = self.registry.enable_all().await;
        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            enabled,
            total = self.registry.len(),
            "Plugins ready"
        );

        let token = CancellationToken::new();
        let maintenance = Maintenance::start(
            Schedule::from_config(&self.config),
            Targets {
                rate_limiter: Arc::clone(&self.rate_limiter),
                spam_guard: Arc::clone(&self.spam_guard),
                notices: Arc::clone(&self.notices),
                registry: Arc::clone(&self.registry),
            },
            &token,
        );

        #[cfg(feature = "watch")]
        let watch = if self.config.plugins.watch {
            match self.start_watcher(&token) {
                Ok(watch) => Some(watch),
                Err(e) => {
                    token.cancel();
                    maintenance.join().await;
                    return Err(e);
                }
            }
        } else {
            None
        };

        *background = Some(Background {
            token,
            maintenance,
            #[cfg(feature = "watch")]
            watch,
        });
        info!("Runtime started");
        Ok(())
    }

    #[cfg(feature = "watch")]
    fn start_watcher(
        &self,
        token: &CancellationToken,
    ) -> RuntimeResult<(kestrel_framework::PluginWatcher, tokio::task::JoinHandle<()>)> {
        let (watcher, mut changes) = kestrel_framework::PluginWatcher::start(
            self.registry.plugin_dirs(),
            self.config.plugins.watch_debounce(),
        )
        .map_err(|e| crate::error::RuntimeError::Watch(e.to_string()))?;

        let registry = Arc::clone(&self.registry);
        let token = token.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    path = changes.recv() => match path {
                        Some(path) => {
                            kestrel_framework::sync_path(&registry, &path).await;
                        }
                        None => break,
                    },
                }
            }
            debug!("Plugin watcher loop stopped");
        });
        Ok((watcher, task))
    }

    /// Stops background tasks and disables every plugin.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let Some(background) = self.background.lock().await.take() else {
            warn!("Runtime is not running");
            return Ok(());
        };

        info!("Stopping Kestrel runtime");
        background.token.cancel();
        background.maintenance.join().await;
        #[cfg(feature = "watch")]
        if let Some((watcher, task)) = background.watch {
            drop(watcher);
            if let Err(e) = task.await {
                debug!(error = %e, "Plugin watcher task ended abnormally");
            }
        }

        self.registry.disable_all().await;
        info!("Runtime stopped");
        Ok(())
    }

    // =========================================================================
    // Event handling
    // =========================================================================

    /// Normalises and dispatches every message of one raw event, returning
    /// the outcomes in batch order.
    ///
    /// Empty when the event is malformed or carries nothing to act on.
    pub async fn handle_event(&self, raw: &Value) -> Vec<DispatchOutcome> {
        self.handler.handle(raw).await
    }

    /// Dispatches an already normalised message.
    pub async fn handle_message(&self, msg: CanonicalMessage) -> DispatchOutcome {
        self.handler.dispatch(msg).await
    }

    /// Starts the runtime and handles events from `events`, one task per
    /// decoded message, until `shutdown` resolves or the channel closes.
    /// In-flight messages are awaited before plugins are disabled.
    pub async fn run_until<F>(&self, mut events: mpsc::Receiver<Value>, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        tokio::pin!(shutdown);

        let mut in_flight = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                event = events.recv() => {
                    let Some(raw) = event else {
                        info!("Event source closed");
                        break;
                    };
                    for msg in self.handler.decode(&raw) {
                        let handler = self.handler.clone();
                        in_flight.spawn(async move { handler.dispatch(msg).await });
                    }
                }
                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = done {
                        error!(error = %e, "Event task failed");
                    }
                }
            }
        }

        if !in_flight.is_empty() {
            debug!(pending = in_flight.len(), "Waiting for in-flight events");
        }
        while let Some(done) = in_flight.join_next().await {
            if let Err(e) = done {
                error!(error = %e, "Event task failed");
            }
        }

        self.shutdown().await
    }

    /// [`run_until`](Self::run_until) Ctrl+C or SIGTERM.
    pub async fn run(&self, events: mpsc::Receiver<Value>) -> RuntimeResult<()> {
        info!("Kestrel runtime is now running. Press Ctrl+C to stop.");
        self.run_until(events, wait_for_shutdown()).await
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only"),
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down");
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`KestrelRuntime`].
///
/// A transport is required; everything else has a default derived from
/// the loaded configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<KestrelConfig>,
    transport: Option<BoxedTransport>,
    decoder: Option<BoxedDecoder>,
    oracle: Option<BoxedAccessOracle>,
    catalog: HandlerCatalog,
    services: Services,
    capabilities: Capabilities,
    builtins: Vec<(PluginManifest, BoxedPlugin)>,
    management: bool,
    init_logging: bool,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            transport: None,
            decoder: None,
            oracle: None,
            catalog: HandlerCatalog::new(),
            services: Services::new(),
            capabilities: Capabilities::default(),
            builtins: Vec::new(),
            management: true,
            init_logging: true,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses `config` as is instead of loading one. It is still validated.
    pub fn config(mut self, config: KestrelConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn transport<T: Transport>(self, transport: T) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: BoxedTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replaces the default multi-device chat decoder.
    pub fn decoder<D: EventDecoder>(mut self, decoder: D) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Replaces the default file-backed owner and premium lookups.
    pub fn oracle(mut self, oracle: BoxedAccessOracle) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Replaces the handler catalog. The `reply` kind is only present if
    /// `catalog` has it.
    pub fn catalog(mut self, catalog: HandlerCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Registers a handler kind manifests can name.
    pub fn handler<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginManifest) -> Result<BoxedPlugin, kestrel_core::BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.catalog.register(kind, factory);
        self
    }

    /// Makes `service` available to plugins through their contexts.
    pub fn service<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.services.insert(service);
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Registers a code-defined plugin alongside the manifest-backed ones.
    pub fn builtin<P: CommandPlugin>(mut self, manifest: PluginManifest, plugin: P) -> Self {
        self.builtins.push((manifest, Arc::new(plugin)));
        self
    }

    /// Leaves out the owner-only plugin management commands.
    pub fn without_management(mut self) -> Self {
        self.management = false;
        self
    }

    /// Leaves global logging setup to the caller.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    pub fn build(self) -> RuntimeResult<KestrelRuntime> {
        let config = match self.config {
            Some(config) => {
                validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };
        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let transport = self
            .transport
            .ok_or_else(|| ConfigError::missing_field("transport"))?;
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(WhatsAppDecoder::new(config.normalizer())));
        let oracle = self.oracle.unwrap_or_else(|| {
            Arc::new(FileAccessOracle::new(
                config.storage.owner_path(),
                config.storage.premium_path(),
            ))
        });

        let rate_limiter = Arc::new(RateLimiter::new(config.limits.rate_window()));
        let spam_guard = Arc::new(SpamGuard::new(
            config.limits.spam_threshold,
            config.limits.spam_window(),
        ));
        let notices = Arc::new(NoticeCache::new(config.limits.notice_cache_cap));
        let blocklist = Arc::new(Blocklist::new(config.storage.blocklist_path()));

        let mut services = self.services;
        services.insert(Arc::clone(&rate_limiter));
        services.insert(Arc::clone(&spam_guard));
        services.insert(Arc::clone(&blocklist));

        let screen = if config.plugins.security_checks {
            SafetyScreen::with_patterns(&config.plugins.deny_patterns)
                .map_err(|e| ConfigError::validation(e.to_string()))?
        } else {
            warn!("Plugin security checks are disabled");
            SafetyScreen::disabled()
        };

        let mut registry = PluginRegistry::builder()
            .catalog(self.catalog)
            .screen(screen)
            .capabilities(self.capabilities)
            .services(services);
        for dir in config.plugins.dirs() {
            registry = registry.plugin_dir(dir);
        }
        for file in &config.plugins.excluded_files {
            registry = registry.exclude(file.clone());
        }
        let registry = Arc::new(registry.build());

        if self.management {
            let store = GeneratedPluginStore::new(
                &config.plugins.generated_dir,
                config.storage.generated_records_path(),
                config.storage.action_log_path(),
            );
            install_management(&registry, Arc::new(store))?;
        }
        for (manifest, plugin) in self.builtins {
            registry.register_builtin(manifest, plugin)?;
        }

        let dispatcher = Dispatcher::builder(Arc::clone(&registry))
            .config(config.dispatch())
            .rate_limiter(Arc::clone(&rate_limiter))
            .spam_guard(Arc::clone(&spam_guard))
            .blocklist(Arc::clone(&blocklist))
            .notice_cache(Arc::clone(&notices))
            .oracle(oracle)
            .timeout(config.plugins.max_execution())
            .failure_threshold(config.plugins.failure_threshold)
            .build();

        info!(
            decoder = decoder.name(),
            plugin_dirs = ?registry.plugin_dirs(),
            destination = ?config.bot.destination,
            "Runtime initialized from configuration"
        );

        Ok(KestrelRuntime {
            handler: EventHandler {
                decoder,
                transport,
                dispatcher: Arc::new(dispatcher),
            },
            config,
            registry,
            rate_limiter,
            spam_guard,
            notices,
            blocklist,
            background: Mutex::new(None),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;
    use kestrel_core::{BoxError, SendOptions, TransportResult};
    use kestrel_framework::{ExecutionContext, RegisterContext};
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;

    use super::*;
    use crate::error::RuntimeError;

    #[derive(Default)]
    struct Recorder {
        sent: SyncMutex<Vec<(String, String)>>,
    }

    impl Recorder {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, to: &str, text: &str, _: SendOptions) -> TransportResult<()> {
            self.sent.lock().push((to.into(), text.into()));
            Ok(())
        }
    }

    struct Echo;

    #[async_trait]
    impl CommandPlugin for Echo {
        async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
            Ok(())
        }

        async fn execute(
            &self,
            msg: &CanonicalMessage,
            _transport: &BoxedTransport,
            ctx: &ExecutionContext,
        ) -> Result<Value, BoxError> {
            let text = ctx.args.join(" ");
            msg.reply(&text).await;
            Ok(Value::String(text))
        }
    }

    fn config(root: &Path) -> KestrelConfig {
        let mut config = KestrelConfig::default();
        config.plugins.core_dir = root.join("plugins");
        config.plugins.generated_dir = root.join("plugins/generated");
        config.plugins.watch = false;
        config.storage.data_dir = root.join("data");
        config.bot.owners = vec!["62800".into()];
        config
    }

    fn build(root: &Path, recorder: &Arc<Recorder>) -> KestrelRuntime {
        let plugins = root.join("plugins");
        fs::create_dir_all(&plugins).unwrap();
        fs::write(
            plugins.join("ping.toml"),
            "handler = \"reply\"\nreply = \"pong {push_name}\"\naliases = [\"p\"]\n",
        )
        .unwrap();

        KestrelRuntime::builder()
            .config(config(root))
            .without_logging()
            .transport_arc(Arc::clone(recorder) as BoxedTransport)
            .builtin(PluginManifest::new("echo"), Echo)
            .build()
            .unwrap()
    }

    fn event(id: &str, from: &str, text: &str) -> Value {
        json!({
            "key": {"id": id, "remoteJid": format!("{from}@s.whatsapp.net")},
            "pushName": "Ana",
            "message": {"conversation": text}
        })
    }

    #[tokio::test]
    async fn raw_event_reaches_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);
        runtime.start().await.unwrap();

        let outcomes = runtime.handle_event(&event("A1", "62811", ".ping")).await;
        assert!(outcomes[0].is_executed());
        assert_eq!(
            recorder.sent.lock().first().cloned(),
            Some(("62811@s.whatsapp.net".to_string(), "pong Ana".to_string()))
        );

        let outcomes = runtime.handle_event(&event("A2", "62822", ".echo hi there")).await;
        assert!(outcomes[0].is_executed());
        assert_eq!(recorder.texts().last().map(String::as_str), Some("hi there"));

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_and_plain_events() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);
        runtime.start().await.unwrap();

        assert!(runtime.handle_event(&json!({"nope": true})).await.is_empty());
        assert!(matches!(
            runtime.handle_event(&event("B1", "62811", "hello")).await.as_slice(),
            [DispatchOutcome::NotCommand]
        ));
        assert!(recorder.texts().is_empty());

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn blocked_sender_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);
        runtime.start().await.unwrap();

        assert!(runtime.blocklist().add_block("62811"));
        assert!(matches!(
            runtime.handle_event(&event("C1", "62811", ".ping")).await.as_slice(),
            [DispatchOutcome::Blocked]
        ));
        assert!(recorder.texts().is_empty());
        assert!(dir.path().join("data/blocklist.json").exists());

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn run_until_drains_channel_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);

        let (tx, rx) = mpsc::channel(8);
        tx.send(event("D1", "62811", ".ping")).await.unwrap();
        tx.send(event("D2", "62822", ".p")).await.unwrap();
        drop(tx);

        runtime
            .run_until(rx, std::future::pending::<()>())
            .await
            .unwrap();

        let mut texts = recorder.texts();
        texts.sort();
        assert_eq!(texts, ["pong Ana", "pong Ana"]);
        assert!(!runtime.is_running().await);
        assert!(!runtime.registry().is_active("ping"));
    }

    fn batch(items: &[Value]) -> Value {
        json!({"type": "notify", "messages": items})
    }

    #[tokio::test]
    async fn batch_event_dispatches_every_item() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);
        runtime.start().await.unwrap();

        let outcomes = runtime
            .handle_event(&batch(&[
                event("F1", "62811", ".ping"),
                event("F2", "62822", ".ping"),
            ]))
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(DispatchOutcome::is_executed));

        let mut sent = recorder.sent.lock().clone();
        sent.sort();
        assert_eq!(
            sent,
            [
                ("62811@s.whatsapp.net".to_string(), "pong Ana".to_string()),
                ("62822@s.whatsapp.net".to_string(), "pong Ana".to_string()),
            ]
        );
        assert_eq!(runtime.registry().info("ping").unwrap().metrics.executions, 2);

        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn run_until_spawns_each_batch_item() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);

        let (tx, rx) = mpsc::channel(8);
        tx.send(batch(&[
            event("G1", "62811", ".ping"),
            event("G2", "62822", ".echo two"),
            event("G3", "62833", "not a command"),
        ]))
        .await
        .unwrap();
        drop(tx);

        runtime
            .run_until(rx, std::future::pending::<()>())
            .await
            .unwrap();

        let mut texts = recorder.texts();
        texts.sort();
        assert_eq!(texts, ["pong Ana", "two"]);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_shutdown_disables() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);

        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.is_running().await);
        assert!(runtime.registry().is_active("ping"));
        assert!(runtime.registry().is_active("echo"));
        assert!(runtime.registry().contains("plugins"));

        let stats = runtime.stats().await;
        assert!(stats.running);
        assert_eq!(stats.plugins.active, stats.plugins.total);

        runtime.shutdown().await.unwrap();
        assert!(!runtime.registry().is_active("echo"));
        runtime.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn owner_manages_plugins_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let runtime = build(dir.path(), &recorder);
        runtime.start().await.unwrap();

        let outcomes = runtime
            .handle_event(&event("E1", "62800", ".addplugin hello | hi {push_name}"))
            .await;
        assert!(outcomes[0].is_executed());
        assert!(runtime.registry().is_active("hello"));

        runtime.rate_limiter().reset("62800");
        runtime.handle_event(&event("E2", "62800", ".hello")).await;
        assert_eq!(recorder.texts().last().map(String::as_str), Some("hi Ana"));

        let generated: PathBuf = dir.path().join("plugins/generated/hello.toml");
        assert!(generated.exists());

        runtime.shutdown().await.unwrap();
    }

    #[test]
    fn transport_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let err = KestrelRuntime::builder()
            .config(config(dir.path()))
            .without_logging()
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RuntimeError::Config(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.limits.rate_window_ms = 0;
        let err = KestrelRuntime::builder()
            .config(config)
            .without_logging()
            .transport(Recorder::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RuntimeError::Config(ConfigError::Validation { .. })));
    }

    #[cfg(feature = "watch")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn watcher_loads_new_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let plugins = dir.path().join("plugins");
        fs::create_dir_all(&plugins).unwrap();
        let mut config = config(dir.path());
        config.plugins.watch = true;
        config.plugins.watch_debounce_ms = 50;

        let runtime = KestrelRuntime::builder()
            .config(config)
            .without_logging()
            .without_management()
            .transport_arc(Arc::clone(&recorder) as BoxedTransport)
            .build()
            .unwrap();
        runtime.start().await.unwrap();

        fs::write(plugins.join("late.toml"), "handler = \"reply\"\nreply = \"ok\"\n").unwrap();
        let mut loaded = false;
        for _ in 0..100 {
            if runtime.registry().is_active("late") {
                loaded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(loaded);

        runtime.shutdown().await.unwrap();
    }
}
