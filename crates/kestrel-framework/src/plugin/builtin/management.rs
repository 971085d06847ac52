//! Owner-only commands for managing plugins from chat.
//!
//! | Command | Effect |
//! |---------|--------|
//! | `plugins` (`pluginlist`) | list every plugin with state and health |
//! | `pluginstatus <name>` | runtime record and metrics of one plugin |
//! | `reloadplugin <name>` | reload one plugin |
//! | `reloadplugins` | reload every file-backed plugin |
//! | `addplugin <name> \| <reply>` | create a `reply` plugin in the generated directory |
//! | `delplugin <name>` | delete a generated plugin |
//!
//! The commands hold a weak reference to the registry so that registering
//! them does not create a reference cycle.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use kestrel_core::{BoxError, BoxedTransport, CanonicalMessage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::context::{ExecutionContext, RegisterContext};
use crate::error::{PluginError, PluginResult};
use crate::plugin::catalog::REPLY_KIND;
use crate::plugin::core::CommandPlugin;
use crate::plugin::manifest::{PluginManifest, is_valid_name};
use crate::plugin::registry::PluginRegistry;

// =============================================================================
// GeneratedPluginStore
// =============================================================================

/// One plugin created through `addplugin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedRecord {
    pub name: String,
    pub added_by: String,
    /// Unix time in milliseconds.
    pub at: u64,
}

/// Records of generated plugins plus an append-only action log.
#[derive(Debug)]
pub struct GeneratedPluginStore {
    dir: PathBuf,
    records_path: PathBuf,
    log_path: PathBuf,
    lock: Mutex<()>,
}

impl GeneratedPluginStore {
    /// `dir` receives the manifests; the record list and log go to their own
    /// paths.
    pub fn new(
        dir: impl Into<PathBuf>,
        records_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dir: dir.into(),
            records_path: records_path.into(),
            log_path: log_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.toml"))
    }

    /// Current records; an unreadable file counts as empty.
    pub fn records(&self) -> Vec<GeneratedRecord> {
        let _guard = self.lock.lock();
        self.read_records()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records().iter().any(|r| r.name == name)
    }

    /// Writes the manifest file and appends a record.
    pub fn create(&self, manifest: &PluginManifest, added_by: &str) -> PluginResult<PathBuf> {
        let _guard = self.lock.lock();
        let path = self.manifest_path(&manifest.name);
        if path.exists() {
            return Err(PluginError::AlreadyLoaded(manifest.name.clone()));
        }
        let body = manifest
            .to_toml_string()
            .map_err(|e| PluginError::invalid_manifest(&path, e.to_string()))?;
        fs::create_dir_all(&self.dir).map_err(|e| PluginError::io(&self.dir, e))?;
        fs::write(&path, body).map_err(|e| PluginError::io(&path, e))?;

        let mut records = self.read_records();
        records.retain(|r| r.name != manifest.name);
        records.push(GeneratedRecord {
            name: manifest.name.clone(),
            added_by: added_by.to_string(),
            at: unix_millis(),
        });
        self.write_records(&records)?;
        self.log_action(added_by, "added", &manifest.name);
        Ok(path)
    }

    /// Deletes the manifest file and its record.
    pub fn delete(&self, name: &str, removed_by: &str) -> PluginResult<()> {
        let _guard = self.lock.lock();
        let path = self.manifest_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PluginError::io(&path, e)),
        }
        let mut records = self.read_records();
        records.retain(|r| r.name != name);
        self.write_records(&records)?;
        self.log_action(removed_by, "removed", name);
        Ok(())
    }

    fn read_records(&self) -> Vec<GeneratedRecord> {
        fs::read_to_string(&self.records_path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default()
    }

    fn write_records(&self, records: &[GeneratedRecord]) -> PluginResult<()> {
        if let Some(parent) = self.records_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PluginError::io(parent, e))?;
        }
        let body = serde_json::to_string_pretty(records)
            .map_err(|e| PluginError::invalid_manifest(&self.records_path, e.to_string()))?;
        fs::write(&self.records_path, body).map_err(|e| PluginError::io(&self.records_path, e))
    }

    fn log_action(&self, actor: &str, action: &str, name: &str) {
        let line = format!("[{}] {actor} {action} {name}\n", unix_millis());
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            warn!(path = %self.log_path.display(), error = %e, "Failed to append plugin action log");
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// =============================================================================
// Commands
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    List,
    Status,
    Reload,
    ReloadAll,
    Add,
    Delete,
}

impl Command {
    const ALL: [Command; 6] = [
        Self::List,
        Self::Status,
        Self::Reload,
        Self::ReloadAll,
        Self::Add,
        Self::Delete,
    ];

    fn manifest(self) -> PluginManifest {
        let (name, description) = match self {
            Self::List => ("plugins", "List plugins with status and health"),
            Self::Status => ("pluginstatus", "Show runtime details of a plugin"),
            Self::Reload => ("reloadplugin", "Reload one plugin"),
            Self::ReloadAll => ("reloadplugins", "Reload every file-backed plugin"),
            Self::Add => ("addplugin", "Create a reply plugin: <name> | <reply text>"),
            Self::Delete => ("delplugin", "Delete a generated plugin"),
        };
        let manifest = PluginManifest::new(name)
            .with_description(description)
            .with_category("owner")
            .owner_only();
        match self {
            Self::List => manifest.with_alias("pluginlist"),
            _ => manifest,
        }
    }
}

struct ManagementCommand {
    command: Command,
    registry: Weak<PluginRegistry>,
    store: Arc<GeneratedPluginStore>,
}

/// Registers the management commands as built-in plugins.
pub fn install(registry: &Arc<PluginRegistry>, store: Arc<GeneratedPluginStore>) -> PluginResult<()> {
    for command in Command::ALL {
        let handler = Arc::new(ManagementCommand {
            command,
            registry: Arc::downgrade(registry),
            store: Arc::clone(&store),
        });
        registry.register_builtin(command.manifest(), handler)?;
    }
    Ok(())
}

#[async_trait]
impl CommandPlugin for ManagementCommand {
    async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
        Ok(())
    }

    async fn execute(
        &self,
        msg: &CanonicalMessage,
        _transport: &BoxedTransport,
        ctx: &ExecutionContext,
    ) -> Result<Value, BoxError> {
        let registry = self
            .registry
            .upgrade()
            .ok_or("plugin registry is no longer available")?;
        let (text, result) = match self.command {
            Command::List => list(&registry),
            Command::Status => status(&registry, ctx.args.first().map(String::as_str)),
            Command::Reload => reload(&registry, ctx.args.first().map(String::as_str)).await,
            Command::ReloadAll => reload_all(&registry).await,
            Command::Add => add(&registry, &self.store, &msg.content, &ctx.sender_number).await,
            Command::Delete => {
                delete(&registry, &self.store, ctx.args.first().map(String::as_str), &ctx.sender_number)
                    .await
            }
        };
        msg.reply(&text).await;
        Ok(result)
    }
}

type Response = (String, Value);

fn list(registry: &PluginRegistry) -> Response {
    let plugins = registry.list();
    let mut text = format!("*Plugins* ({} loaded, {} active)\n", plugins.len(), registry.stats().active);
    for p in &plugins {
        let _ = write!(
            text,
            "\n• {} [{}] {} / {}",
            p.name(),
            p.manifest.category,
            p.runtime.state,
            p.health.status
        );
    }
    (text, json!({ "count": plugins.len() }))
}

fn status(registry: &PluginRegistry, name: Option<&str>) -> Response {
    let Some(name) = name.map(str::to_lowercase) else {
        return usage("pluginstatus <name>");
    };
    let Some(resolved) = registry.resolve(&name) else {
        return (format!("❌ Plugin *{name}* not found."), json!({ "found": false }));
    };
    let Some(info) = registry.info(&resolved.name) else {
        return (format!("❌ Plugin *{name}* not found."), json!({ "found": false }));
    };

    let m = &info.metrics;
    let mut text = format!("*{}* v{}\n{}\n", info.name(), info.manifest.version, info.manifest.description);
    let _ = write!(
        text,
        "\nState: {}\nHealth: {} ({} consecutive, {} total errors)\nUptime: {}s",
        info.runtime.state,
        info.health.status,
        info.health.consecutive_errors,
        info.health.total_errors,
        info.runtime.loaded_at.elapsed().as_secs(),
    );
    let _ = write!(
        text,
        "\nExecutions: {} ({} ok, {} failed, {:.1}% success)\nAverage: {}ms, peak: {}ms",
        m.executions,
        m.successes,
        m.failures,
        m.success_rate(),
        m.average_time().as_millis(),
        m.peak_time.as_millis(),
    );
    if let Some(err) = &info.health.last_error {
        let _ = write!(text, "\nLast error: {err}");
    }
    if let Some(src) = &info.source {
        let _ = write!(text, "\nSource: {}", src.display());
    }
    (
        text,
        json!({
            "found": true,
            "name": info.name(),
            "active": info.active,
            "health": info.health.status,
            "executions": m.executions,
        }),
    )
}

async fn reload(registry: &PluginRegistry, name: Option<&str>) -> Response {
    let Some(name) = name.map(str::to_lowercase) else {
        return usage("reloadplugin <name>");
    };
    let target = registry.resolve(&name).map(|s| s.name).unwrap_or(name);
    match registry.reload(&target).await {
        Ok(reloaded) => (
            format!("✅ Plugin *{reloaded}* reloaded."),
            json!({ "reloaded": reloaded }),
        ),
        Err(e) => (
            format!("❌ Failed to reload *{target}*: {e}"),
            json!({ "error": e.to_string() }),
        ),
    }
}

async fn reload_all(registry: &PluginRegistry) -> Response {
    let report = registry.reload_all().await;
    let mut text = format!(
        "♻️ Reloaded {} plugin(s), {} failed.",
        report.reloaded.len(),
        report.failed.len()
    );
    for (name, e) in &report.failed {
        let _ = write!(text, "\n• {name}: {e}");
    }
    (
        text,
        json!({ "reloaded": report.reloaded, "failed": report.failed.len() }),
    )
}

async fn add(
    registry: &PluginRegistry,
    store: &GeneratedPluginStore,
    content: &str,
    sender: &str,
) -> Response {
    let Some((raw_name, reply)) = content.split_once('|') else {
        return usage("addplugin <name> | <reply text>");
    };
    let name = raw_name.trim().to_lowercase();
    let reply = reply.trim();
    if !is_valid_name(&name) {
        return (
            "❌ Invalid plugin name. Use only letters, digits, '-' and '_'.".to_string(),
            json!({ "error": "invalid name" }),
        );
    }
    if reply.is_empty() {
        return usage("addplugin <name> | <reply text>");
    }
    if registry.resolve(&name).is_some() {
        return (
            format!("⚠️ A command named *{name}* already exists. Choose another name."),
            json!({ "error": "exists" }),
        );
    }

    let mut manifest = PluginManifest::new(&name).with_category("generated");
    manifest.handler = REPLY_KIND.to_string();
    manifest.reply = Some(reply.to_string());
    manifest.author = sender.to_string();

    let created = match store.create(&manifest, sender) {
        Ok(path) => path,
        Err(e) => return failure("save", &name, &e),
    };
    let loaded = match registry.load_file(&created).await {
        Ok(loaded) => registry.enable(&loaded).await.map(|_| loaded),
        Err(e) => Err(e),
    };
    match loaded {
        Ok(loaded) => {
            info!(plugin = %loaded, added_by = %sender, "Generated plugin added");
            (
                format!("✅ Plugin *{loaded}* registered by @{sender}."),
                json!({ "added": loaded }),
            )
        }
        Err(e) => {
            if let Err(cleanup) = store.delete(&name, sender) {
                warn!(plugin = %name, error = %cleanup, "Failed to remove rejected plugin");
            }
            failure("load", &name, &e)
        }
    }
}

async fn delete(
    registry: &PluginRegistry,
    store: &GeneratedPluginStore,
    name: Option<&str>,
    sender: &str,
) -> Response {
    let Some(name) = name.map(str::to_lowercase) else {
        return usage("delplugin <name>");
    };
    if !store.contains(&name) {
        return (
            format!("❌ *{name}* is not a generated plugin."),
            json!({ "error": "not generated" }),
        );
    }
    match registry.unload(&name).await {
        Ok(()) | Err(PluginError::NotFound(_)) => {}
        Err(e) => return failure("unload", &name, &e),
    }
    match store.delete(&name, sender) {
        Ok(()) => {
            info!(plugin = %name, removed_by = %sender, "Generated plugin deleted");
            (format!("🗑️ Plugin *{name}* deleted."), json!({ "deleted": name }))
        }
        Err(e) => failure("delete", &name, &e),
    }
}

fn usage(syntax: &str) -> Response {
    (format!("Usage: {syntax}"), json!({ "error": "usage" }))
}

fn failure(action: &str, name: &str, e: &PluginError) -> Response {
    warn!(plugin = %name, action, error = %e, "Plugin management command failed");
    (
        format!("❌ Failed to {action} *{name}*: {e}"),
        json!({ "error": e.to_string() }),
    )
}

#[cfg(test)]
mod tests {
    use kestrel_core::{ReplyHandle, SendOptions, Transport, TransportResult};

    use super::*;
    use crate::context::Services;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, _: &str, text: &str, _: SendOptions) -> TransportResult<()> {
            self.0.lock().push(text.to_string());
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        registry: Arc<PluginRegistry>,
        store: Arc<GeneratedPluginStore>,
        recorder: Arc<Recorder>,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let generated = dir.path().join("generated");
        let registry = Arc::new(PluginRegistry::builder().plugin_dir(&generated).build());
        let store = Arc::new(GeneratedPluginStore::new(
            &generated,
            dir.path().join("generated_plugins.json"),
            dir.path().join("plugin_actions.log"),
        ));
        install(&registry, store.clone()).unwrap();
        registry.enable_all().await;
        Fixture {
            _dir: dir,
            registry,
            store,
            recorder: Arc::new(Recorder::default()),
        }
    }

    async fn run(f: &Fixture, command: &str, content: &str) -> Value {
        let plugin = f.registry.resolve(command).unwrap();
        let transport: BoxedTransport = f.recorder.clone();
        let mut msg = CanonicalMessage::new(
            "id",
            "99@s.whatsapp.net",
            "99@s.whatsapp.net",
            ReplyHandle::new(transport.clone(), "99@s.whatsapp.net", None),
        );
        msg.command = command.to_string();
        msg.content = content.to_string();
        msg.args = content.split_whitespace().map(str::to_string).collect();
        let msg = Arc::new(msg);
        let ctx = ExecutionContext::new(
            &plugin.name,
            msg.clone(),
            Arc::new(Value::Null),
            Arc::new(Services::new()),
        )
        .with_access(true, true);
        plugin.handler.execute(&msg, &transport, &ctx).await.unwrap()
    }

    #[tokio::test]
    async fn installs_owner_only_commands() {
        let f = fixture().await;
        assert_eq!(f.registry.len(), 6);
        let list = f.registry.resolve("pluginlist").unwrap();
        assert_eq!(list.name, "plugins");
        assert!(list.manifest.owner_only);
    }

    #[tokio::test]
    async fn add_then_delete_generated_plugin() {
        let f = fixture().await;

        let added = run(&f, "addplugin", "greet | hello {push_name}").await;
        assert_eq!(added["added"], "greet");
        assert!(f.registry.is_active("greet"));
        assert!(f.store.manifest_path("greet").exists());
        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].added_by, "99");

        let dup = run(&f, "addplugin", "greet | again").await;
        assert_eq!(dup["error"], "exists");

        let deleted = run(&f, "delplugin", "greet").await;
        assert_eq!(deleted["deleted"], "greet");
        assert!(!f.registry.contains("greet"));
        assert!(f.store.records().is_empty());
        assert!(!f.store.manifest_path("greet").exists());

        let log = fs::read_to_string(&f.store.log_path).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[tokio::test]
    async fn rejected_plugins_leave_no_trace() {
        let f = fixture().await;
        let out = run(&f, "addplugin", "sneaky | eval(1)").await;
        assert!(out["error"].as_str().unwrap().contains("safety screen"));
        assert!(!f.store.manifest_path("sneaky").exists());
        assert!(f.store.records().is_empty());

        let out = run(&f, "addplugin", "no name here").await;
        assert_eq!(out["error"], "usage");
    }

    #[tokio::test]
    async fn builtins_cannot_be_deleted() {
        let f = fixture().await;
        let out = run(&f, "delplugin", "plugins").await;
        assert_eq!(out["error"], "not generated");
        assert!(f.registry.contains("plugins"));
    }

    #[tokio::test]
    async fn status_and_list_report() {
        let f = fixture().await;
        let out = run(&f, "pluginstatus", "pluginlist").await;
        assert_eq!(out["name"], "plugins");
        assert_eq!(out["active"], true);

        let out = run(&f, "plugins", "").await;
        assert_eq!(out["count"], 6);
        assert!(f.recorder.0.lock().last().unwrap().contains("reloadplugins"));
    }
}
