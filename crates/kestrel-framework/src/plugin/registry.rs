//! Plugin lifecycle, health and metrics.
//!
//! [`PluginRegistry`] is the single owner of every plugin record. It:
//!
//! - Discovers `*.toml` manifests under the configured directories, screens
//!   and validates them, resolves their dependencies and instantiates their
//!   handlers through the [`HandlerCatalog`].
//! - Drives the `loaded → enabled ⇄ disabled` lifecycle, calling each
//!   handler's `register` and `deactivate` hooks.
//! - Tracks health (consecutive failures) and execution metrics, updated by
//!   the [`ExecutionSupervisor`](crate::ExecutionSupervisor).
//! - Applies filesystem changes: added files are loaded and enabled,
//!   modified files reloaded, removed files unloaded.
//!
//! Lifecycle operations are serialised by an async mutex; the record map sits
//! behind a synchronous lock that is never held across an `.await`. Lookups
//! hand out [`PluginSnapshot`]s, so a running handler is unaffected by a
//! concurrent reload.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = Arc::new(
//!     PluginRegistry::builder()
//!         .plugin_dir("plugins")
//!         .catalog(catalog)
//!         .build(),
//! );
//! registry.load_all().await;
//! registry.enable_all().await;
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use parking_lot::RwLock;
use semver::Version;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::catalog::HandlerCatalog;
use super::core::{BoxedPlugin, HealthProbe};
use super::deps::{Capabilities, check_dependencies};
use super::health::{
    DisableReason, ExecutionMetrics, HealthRecord, HealthStatus, LifecycleState, RuntimeRecord,
};
use super::manifest::{PluginManifest, is_valid_name};
use super::screen::SafetyScreen;
use crate::context::{RegisterContext, Services};
use crate::error::{PluginError, PluginResult};

// =============================================================================
// Public views
// =============================================================================

/// What a dispatcher needs to run one plugin invocation.
#[derive(Clone)]
pub struct PluginSnapshot {
    pub name: String,
    pub manifest: Arc<PluginManifest>,
    pub handler: BoxedPlugin,
}

impl std::fmt::Debug for PluginSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSnapshot")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Read-only view of one plugin record.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    pub manifest: Arc<PluginManifest>,
    /// Manifest file, `None` for code-defined plugins.
    pub source: Option<PathBuf>,
    pub active: bool,
    pub runtime: RuntimeRecord,
    pub health: HealthRecord,
    pub metrics: ExecutionMetrics,
}

impl PluginInfo {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }
}

/// Counts over the whole registry.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_health: BTreeMap<HealthStatus, usize>,
}

/// Whether a resolved plugin may run right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Ready,
    Inactive,
    Critical,
}

/// A filesystem change mapped onto the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginChange {
    Added(PathBuf),
    Modified(String),
    Removed(String),
}

/// Outcome of a bulk load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, PluginError)>,
}

/// Outcome of reloading every file-backed plugin.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub reloaded: Vec<String>,
    pub failed: Vec<(String, PluginError)>,
}

// =============================================================================
// Internal state
// =============================================================================

struct PluginEntry {
    manifest: Arc<PluginManifest>,
    handler: BoxedPlugin,
    source: Option<PathBuf>,
    seq: u64,
    runtime: RuntimeRecord,
    health: HealthRecord,
    metrics: ExecutionMetrics,
}

impl PluginEntry {
    fn info(&self, active: bool) -> PluginInfo {
        PluginInfo {
            manifest: Arc::clone(&self.manifest),
            source: self.source.clone(),
            active,
            runtime: self.runtime.clone(),
            health: self.health.clone(),
            metrics: self.metrics.clone(),
        }
    }

    fn snapshot(&self) -> PluginSnapshot {
        PluginSnapshot {
            name: self.manifest.name.clone(),
            manifest: Arc::clone(&self.manifest),
            handler: Arc::clone(&self.handler),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    plugins: BTreeMap<String, PluginEntry>,
    active: HashSet<String>,
    next_seq: u64,
}

impl RegistryState {
    fn version_of(&self, name: &str) -> Option<Version> {
        self.plugins.get(name).map(|e| e.manifest.version.clone())
    }

    fn insert(&mut self, manifest: PluginManifest, handler: BoxedPlugin, source: Option<PathBuf>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let name = manifest.name.clone();
        for alias in &manifest.aliases {
            if let Some(owner) = self.owner_of(alias) {
                warn!(plugin = %name, alias = %alias, owner = %owner, "Alias shadows an existing command");
            }
        }
        self.plugins.insert(
            name,
            PluginEntry {
                manifest: Arc::new(manifest),
                handler,
                source,
                seq,
                runtime: RuntimeRecord::loaded(),
                health: HealthRecord::default(),
                metrics: ExecutionMetrics::default(),
            },
        );
    }

    fn owner_of(&self, command: &str) -> Option<&str> {
        if let Some(entry) = self.plugins.get(command) {
            return Some(&entry.manifest.name);
        }
        self.plugins
            .values()
            .find(|e| e.manifest.aliases.iter().any(|a| a == command))
            .map(|e| e.manifest.name.as_str())
    }
}

fn path_key(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

// =============================================================================
// RegistryBuilder
// =============================================================================

#[derive(Default)]
pub struct RegistryBuilder {
    catalog: HandlerCatalog,
    screen: SafetyScreen,
    capabilities: Capabilities,
    services: Services,
    dirs: Vec<PathBuf>,
    excluded: HashSet<String>,
}

impl RegistryBuilder {
    pub fn catalog(mut self, catalog: HandlerCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn screen(mut self, screen: SafetyScreen) -> Self {
        self.screen = screen;
        self
    }

    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    /// Adds a directory scanned recursively for manifests.
    pub fn plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dirs.push(dir.into());
        self
    }

    /// Skips manifest files with this file name.
    pub fn exclude(mut self, file_name: impl Into<String>) -> Self {
        self.excluded.insert(file_name.into());
        self
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            state: RwLock::new(RegistryState::default()),
            lifecycle: tokio::sync::Mutex::new(()),
            catalog: self.catalog,
            screen: self.screen,
            capabilities: self.capabilities,
            services: Arc::new(self.services),
            dirs: self.dirs,
            excluded: self.excluded,
        }
    }
}

// =============================================================================
// PluginRegistry
// =============================================================================

pub struct PluginRegistry {
    state: RwLock<RegistryState>,
    lifecycle: tokio::sync::Mutex<()>,
    catalog: HandlerCatalog,
    screen: SafetyScreen,
    capabilities: Capabilities,
    services: Arc<Services>,
    dirs: Vec<PathBuf>,
    excluded: HashSet<String>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        RegistryBuilder::default().build()
    }
}

impl PluginRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn plugin_dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    // ─── Discovery and loading ───────────────────────────────────────────────

    /// Every manifest under the plugin directories, sorted.
    pub fn discover(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        for dir in &self.dirs {
            if dir.is_dir() {
                collect_manifests(dir, &mut found);
            } else {
                debug!(dir = %dir.display(), "Plugin directory does not exist");
            }
        }
        found.retain(|p| self.is_candidate(p));
        found.sort();
        found.dedup();
        found
    }

    /// Whether `path` looks like a manifest this registry would load.
    pub fn is_candidate(&self, path: &Path) -> bool {
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let excluded = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| self.excluded.contains(n));
        is_toml && !excluded
    }

    /// Loads every discovered manifest.
    ///
    /// Manifests whose dependencies are not yet loaded are retried after the
    /// others, so file order does not matter. One failure never stops the
    /// rest from loading.
    pub async fn load_all(&self) -> LoadReport {
        let _guard = self.lifecycle.lock().await;
        let mut report = LoadReport::default();
        let mut pending = self.discover();

        loop {
            let mut deferred = Vec::new();
            let mut progressed = false;
            for path in pending {
                match self.load_file_locked(&path).await {
                    Ok(name) => {
                        progressed = true;
                        report.loaded.push(name);
                    }
                    Err(e) if e.is_dependency_error() => deferred.push((path, e)),
                    Err(e) => {
                        error!(path = %path.display(), error = %e, "Failed to load plugin");
                        report.failed.push((path, e));
                    }
                }
            }
            if deferred.is_empty() || !progressed {
                for (path, e) in deferred {
                    error!(path = %path.display(), error = %e, "Failed to load plugin");
                    report.failed.push((path, e));
                }
                break;
            }
            pending = deferred.into_iter().map(|(p, _)| p).collect();
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "Plugin discovery complete"
        );
        report
    }

    /// Loads one manifest file; returns the plugin name.
    pub async fn load_file(&self, path: &Path) -> PluginResult<String> {
        let _guard = self.lifecycle.lock().await;
        self.load_file_locked(path).await
    }

    async fn load_file_locked(&self, path: &Path) -> PluginResult<String> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PluginError::io(path, e))?;
        self.screen.check(path, &text)?;
        let manifest = PluginManifest::from_toml_str(&text, path)?;
        let name = manifest.name.clone();

        {
            let state = self.state.read();
            if state.plugins.contains_key(&name) {
                return Err(PluginError::AlreadyLoaded(name));
            }
            check_dependencies(&manifest, &self.capabilities, |dep| state.version_of(dep))?;
        }

        let handler = self.catalog.instantiate(&manifest)?;
        let version = manifest.version.clone();
        {
            let mut state = self.state.write();
            if state.plugins.contains_key(&name) {
                return Err(PluginError::AlreadyLoaded(name));
            }
            state.insert(manifest, handler, Some(path_key(path)));
        }
        info!(plugin = %name, version = %version, path = %path.display(), "Plugin loaded");
        Ok(name)
    }

    /// Adds a code-defined plugin. It is validated like a manifest but never
    /// touches the filesystem.
    pub fn register_builtin(&self, mut manifest: PluginManifest, handler: BoxedPlugin) -> PluginResult<()> {
        manifest.apply_defaults("");
        if !is_valid_name(&manifest.name) {
            return Err(PluginError::InvalidName(manifest.name));
        }
        let mut state = self.state.write();
        if state.plugins.contains_key(&manifest.name) {
            return Err(PluginError::AlreadyLoaded(manifest.name));
        }
        check_dependencies(&manifest, &self.capabilities, |dep| state.version_of(dep))?;
        let name = manifest.name.clone();
        state.insert(manifest, handler, None);
        debug!(plugin = %name, "Built-in plugin registered");
        Ok(())
    }

    // ─── Enable / disable ────────────────────────────────────────────────────

    /// Runs the plugin's `register` hook and adds it to the active set.
    pub async fn enable(&self, name: &str) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.enable_locked(name).await
    }

    async fn enable_locked(&self, name: &str) -> PluginResult<()> {
        let (handler, config) = {
            let state = self.state.read();
            let entry = state
                .plugins
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            if state.active.contains(name) {
                return Ok(());
            }
            (
                Arc::clone(&entry.handler),
                Arc::new(entry.manifest.config.clone()),
            )
        };

        let ctx = RegisterContext::new(name, config, Arc::clone(&self.services));
        if let Err(e) = handler.register(&ctx).await {
            let err = PluginError::RegisterFailed {
                plugin: name.to_string(),
                reason: e.to_string(),
            };
            error!(plugin = %name, error = %e, "Plugin register hook failed");
            if let Some(entry) = self.state.write().plugins.get_mut(name) {
                entry.health.record_failure(e.to_string());
            }
            return Err(err);
        }

        let mut state = self.state.write();
        let Some(entry) = state.plugins.get_mut(name) else {
            return Err(PluginError::NotFound(name.to_string()));
        };
        entry.runtime.state = LifecycleState::Enabled;
        entry.runtime.enabled_at = Some(Instant::now());
        entry.runtime.disable_reason = None;
        entry.health.mark_healthy();
        state.active.insert(name.to_string());
        info!(plugin = %name, "Plugin enabled");
        Ok(())
    }

    /// Enables every loaded plugin in load order; returns how many are active.
    pub async fn enable_all(&self) -> usize {
        let _guard = self.lifecycle.lock().await;
        let names: Vec<String> = {
            let state = self.state.read();
            let mut entries: Vec<&PluginEntry> = state.plugins.values().collect();
            entries.sort_by_key(|e| e.seq);
            entries.iter().map(|e| e.manifest.name.clone()).collect()
        };
        for name in &names {
            if let Err(e) = self.enable_locked(name).await {
                warn!(plugin = %name, error = %e, "Plugin left disabled");
            }
        }
        self.state.read().active.len()
    }

    /// Disables a plugin by hand.
    pub async fn disable(&self, name: &str) -> PluginResult<bool> {
        self.disable_with(name, DisableReason::Manual).await
    }

    /// Removes the plugin from the active set. Returns `false` if it was not
    /// active.
    pub async fn disable_with(&self, name: &str, reason: DisableReason) -> PluginResult<bool> {
        let _guard = self.lifecycle.lock().await;
        self.disable_locked(name, reason).await
    }

    async fn disable_locked(&self, name: &str, reason: DisableReason) -> PluginResult<bool> {
        let handler = {
            let mut state = self.state.write();
            if !state.plugins.contains_key(name) {
                return Err(PluginError::NotFound(name.to_string()));
            }
            if !state.active.remove(name) {
                return Ok(false);
            }
            let Some(entry) = state.plugins.get_mut(name) else {
                return Err(PluginError::NotFound(name.to_string()));
            };
            entry.runtime.state = LifecycleState::Disabled;
            entry.runtime.disabled_at = Some(Instant::now());
            entry.runtime.disable_reason = Some(reason);
            entry.health.mark_disabled();
            Arc::clone(&entry.handler)
        };

        if let Err(e) = handler.deactivate().await {
            warn!(plugin = %name, error = %e, "Plugin deactivate hook failed");
        }
        info!(plugin = %name, reason = ?reason, "Plugin disabled");
        Ok(true)
    }

    /// Disables every active plugin. Used at shutdown.
    pub async fn disable_all(&self) {
        let _guard = self.lifecycle.lock().await;
        let names: Vec<String> = self.state.read().active.iter().cloned().collect();
        for name in names {
            if let Err(e) = self.disable_locked(&name, DisableReason::Manual).await {
                warn!(plugin = %name, error = %e, "Failed to disable plugin");
            }
        }
    }

    // ─── Unload / reload ─────────────────────────────────────────────────────

    /// Disables (if needed) and forgets the plugin.
    pub async fn unload(&self, name: &str) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> PluginResult<()> {
        self.disable_locked(name, DisableReason::Manual).await?;
        let mut state = self.state.write();
        if state.plugins.remove(name).is_none() {
            return Err(PluginError::NotFound(name.to_string()));
        }
        let dependents = dependents_in(&state, name);
        drop(state);
        if !dependents.is_empty() {
            warn!(plugin = %name, dependents = ?dependents, "Unloaded plugin still has dependents");
        }
        info!(plugin = %name, "Plugin unloaded");
        Ok(())
    }

    /// Re-reads a plugin from its source and restores its enabled state.
    ///
    /// If the new source fails to load, the plugin stays unloaded. A
    /// code-defined plugin is cycled through disable and enable instead.
    pub async fn reload(&self, name: &str) -> PluginResult<String> {
        let _guard = self.lifecycle.lock().await;
        self.reload_locked(name).await
    }

    async fn reload_locked(&self, name: &str) -> PluginResult<String> {
        let (source, was_enabled) = {
            let state = self.state.read();
            let entry = state
                .plugins
                .get(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            (entry.source.clone(), state.active.contains(name))
        };

        let Some(path) = source else {
            if was_enabled {
                self.disable_locked(name, DisableReason::Manual).await?;
                self.enable_locked(name).await?;
            }
            return Ok(name.to_string());
        };

        self.unload_locked(name).await?;
        let new_name = match self.load_file_locked(&path).await {
            Ok(new_name) => new_name,
            Err(e) => {
                error!(plugin = %name, path = %path.display(), error = %e, "Reload failed, plugin removed");
                return Err(e);
            }
        };
        if was_enabled {
            self.enable_locked(&new_name).await?;
        }
        info!(plugin = %new_name, "Plugin reloaded");
        Ok(new_name)
    }

    /// Reloads every file-backed plugin.
    pub async fn reload_all(&self) -> ReloadReport {
        let _guard = self.lifecycle.lock().await;
        let names: Vec<String> = {
            let state = self.state.read();
            state
                .plugins
                .values()
                .filter(|e| e.source.is_some())
                .map(|e| e.manifest.name.clone())
                .collect()
        };
        let mut report = ReloadReport::default();
        for name in names {
            match self.reload_locked(&name).await {
                Ok(new_name) => report.reloaded.push(new_name),
                Err(e) => report.failed.push((name, e)),
            }
        }
        report
    }

    // ─── Filesystem changes ──────────────────────────────────────────────────

    /// Maps a changed path onto a registry operation.
    ///
    /// `exists` tells whether the path is still present on disk.
    pub fn classify_change(&self, path: &Path, exists: bool) -> Option<PluginChange> {
        if !self.is_candidate(path) {
            return None;
        }
        match (self.find_by_path(path), exists) {
            (Some(name), true) => Some(PluginChange::Modified(name)),
            (Some(name), false) => Some(PluginChange::Removed(name)),
            (None, true) => Some(PluginChange::Added(path.to_path_buf())),
            (None, false) => None,
        }
    }

    pub async fn apply_change(&self, change: PluginChange) -> PluginResult<()> {
        let _guard = self.lifecycle.lock().await;
        match change {
            PluginChange::Added(path) => {
                let name = self.load_file_locked(&path).await?;
                self.enable_locked(&name).await
            }
            PluginChange::Modified(name) => self.reload_locked(&name).await.map(|_| ()),
            PluginChange::Removed(name) => self.unload_locked(&name).await,
        }
    }

    // ─── Queries ─────────────────────────────────────────────────────────────

    /// Looks a command up by exact name, then by alias. Case-insensitive.
    pub fn resolve(&self, input: &str) -> Option<PluginSnapshot> {
        let key = input.trim().to_lowercase();
        let state = self.state.read();
        let name = state.owner_of(&key)?;
        state.plugins.get(name).map(PluginEntry::snapshot)
    }

    /// Every name and alias, for fuzzy suggestions.
    pub fn names_and_aliases(&self) -> Vec<String> {
        let state = self.state.read();
        state
            .plugins
            .values()
            .flat_map(|e| std::iter::once(&e.manifest.name).chain(e.manifest.aliases.iter()))
            .cloned()
            .collect()
    }

    /// Every plugin, sorted by name.
    pub fn list(&self) -> Vec<PluginInfo> {
        let state = self.state.read();
        state
            .plugins
            .iter()
            .map(|(name, e)| e.info(state.active.contains(name)))
            .collect()
    }

    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        let state = self.state.read();
        state
            .plugins
            .get(name)
            .map(|e| e.info(state.active.contains(name)))
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.state.read().active.contains(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().plugins.contains_key(name)
    }

    pub fn health(&self, name: &str) -> Option<HealthStatus> {
        self.state.read().plugins.get(name).map(|e| e.health.status)
    }

    pub fn len(&self) -> usize {
        self.state.read().plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        let mut stats = RegistryStats {
            total: state.plugins.len(),
            active: state.active.len(),
            ..Default::default()
        };
        for entry in state.plugins.values() {
            *stats
                .by_category
                .entry(entry.manifest.category.clone())
                .or_default() += 1;
            *stats.by_health.entry(entry.health.status).or_default() += 1;
        }
        stats
    }

    /// Plugins that declare a dependency on `name`.
    pub fn dependents(&self, name: &str) -> Vec<String> {
        dependents_in(&self.state.read(), name)
    }

    /// The plugin loaded from `path`.
    pub fn find_by_path(&self, path: &Path) -> Option<String> {
        let key = path_key(path);
        let state = self.state.read();
        state
            .plugins
            .values()
            .find(|e| e.source.as_deref() == Some(key.as_path()))
            .map(|e| e.manifest.name.clone())
    }

    // ─── Execution bookkeeping ───────────────────────────────────────────────

    /// Whether `name` may be executed right now.
    pub fn admit(&self, name: &str) -> Admission {
        let state = self.state.read();
        if !state.active.contains(name) {
            return Admission::Inactive;
        }
        match state.plugins.get(name) {
            Some(e) if e.health.status == HealthStatus::Critical => Admission::Critical,
            Some(_) => Admission::Ready,
            None => Admission::Inactive,
        }
    }

    pub fn record_success(&self, name: &str, elapsed: Duration) {
        if let Some(entry) = self.state.write().plugins.get_mut(name) {
            entry.metrics.record(elapsed, true);
            entry.health.mark_healthy();
        }
    }

    /// Records a failed attempt; returns the consecutive failure count.
    pub fn record_failure(&self, name: &str, elapsed: Duration, error: &str) -> u32 {
        match self.state.write().plugins.get_mut(name) {
            Some(entry) => {
                entry.metrics.record(elapsed, false);
                entry.health.record_failure(error);
                entry.health.consecutive_errors
            }
            None => 0,
        }
    }

    // ─── Maintenance ─────────────────────────────────────────────────────────

    /// Polls every active plugin's health probe.
    ///
    /// Plugins without a probe recover to healthy once they have no
    /// consecutive failures. Returns the number of plugins checked.
    pub async fn health_sweep(&self) -> usize {
        let targets: Vec<(String, BoxedPlugin)> = {
            let state = self.state.read();
            state
                .active
                .iter()
                .filter_map(|name| {
                    state
                        .plugins
                        .get(name)
                        .map(|e| (name.clone(), Arc::clone(&e.handler)))
                })
                .collect()
        };

        let probes: Vec<Option<HealthProbe>> =
            future::join_all(targets.iter().map(|(_, h)| h.health_check())).await;

        let mut state = self.state.write();
        for ((name, _), probe) in targets.iter().zip(probes) {
            if !state.active.contains(name) {
                continue;
            }
            let Some(entry) = state.plugins.get_mut(name) else {
                continue;
            };
            match probe {
                Some(p) if p.healthy => entry.health.mark_healthy(),
                Some(p) => {
                    let reason = p.error.unwrap_or_else(|| "health check failed".to_string());
                    warn!(plugin = %name, error = %reason, "Plugin health check failed");
                    entry.health.record_failure(reason);
                }
                None if entry.health.consecutive_errors == 0 => entry.health.mark_healthy(),
                None => entry.health.last_check = Some(Instant::now()),
            }
        }
        targets.len()
    }

    /// Resets the metrics of plugins idle for longer than `max_idle`.
    pub fn cleanup_metrics(&self, max_idle: Duration) -> usize {
        let mut state = self.state.write();
        let mut reset = 0;
        for entry in state.plugins.values_mut() {
            let idle = entry
                .metrics
                .last_execution
                .is_some_and(|at| at.elapsed() > max_idle);
            if idle {
                entry.metrics.reset();
                reset += 1;
            }
        }
        if reset > 0 {
            debug!(count = reset, "Idle plugin metrics reset");
        }
        reset
    }
}

fn dependents_in(state: &RegistryState, name: &str) -> Vec<String> {
    state
        .plugins
        .values()
        .filter(|e| e.manifest.dependencies.contains_key(name))
        .map(|e| e.manifest.name.clone())
        .collect()
}

fn collect_manifests(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Cannot read plugin directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_manifests(&path, out);
        } else {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use kestrel_core::{BoxError, BoxedTransport, CanonicalMessage};
    use serde_json::Value;

    use super::*;
    use crate::context::ExecutionContext;
    use crate::plugin::core::CommandPlugin;

    #[derive(Default)]
    struct Counting {
        registered: AtomicUsize,
        deactivated: AtomicUsize,
    }

    #[async_trait]
    impl CommandPlugin for Counting {
        async fn register(&self, _ctx: &RegisterContext) -> Result<(), BoxError> {
            self.registered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(
            &self,
            _msg: &CanonicalMessage,
            _transport: &BoxedTransport,
            _ctx: &ExecutionContext,
        ) -> Result<Value, BoxError> {
            Ok(Value::Null)
        }

        async fn deactivate(&self) -> Result<(), BoxError> {
            self.deactivated.fetch_add(1, Ordering::SeqCst);
            Err("ignored".into())
        }
    }

    fn write(dir: &Path, file: &str, body: &str) -> PathBuf {
        let path = dir.join(file);
        fs::write(&path, body).unwrap();
        path
    }

    fn registry_for(dir: &Path) -> PluginRegistry {
        PluginRegistry::builder().plugin_dir(dir).build()
    }

    #[tokio::test]
    async fn loads_and_enables_manifests() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "ping.toml", "handler = \"reply\"\nreply = \"pong\"\naliases = [\"p\"]");
        fs::create_dir(dir.path().join("nested")).unwrap();
        write(&dir.path().join("nested"), "echo.toml", "handler = \"reply\"\nreply = \"{args}\"");
        write(dir.path(), "notes.txt", "ignored");

        let registry = registry_for(dir.path());
        let report = registry.load_all().await;
        assert_eq!(report.loaded.len(), 2);
        assert!(report.failed.is_empty());
        assert_eq!(registry.health("ping"), Some(HealthStatus::Unknown));

        assert_eq!(registry.enable_all().await, 2);
        assert!(registry.is_active("echo"));
        assert_eq!(registry.health("ping"), Some(HealthStatus::Healthy));
        assert_eq!(registry.stats().by_category["general"], 2);
    }

    #[tokio::test]
    async fn resolves_by_name_and_alias_case_insensitively() {
        let registry = PluginRegistry::default();
        registry
            .register_builtin(
                PluginManifest::new("foo").with_alias("bar"),
                Arc::new(Counting::default()),
            )
            .unwrap();

        for input in ["FOO", "foo", "bar", " Bar "] {
            assert_eq!(registry.resolve(input).unwrap().name, "foo", "input {input}");
        }
        assert!(registry.resolve("baz").is_none());
        assert_eq!(registry.names_and_aliases(), vec!["foo", "bar"]);
    }

    #[tokio::test]
    async fn dependencies_load_in_any_file_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a_child.toml", "handler = \"reply\"\nreply = \"x\"\n[dependencies]\nz_base = \"^1\"");
        write(dir.path(), "z_base.toml", "handler = \"reply\"\nreply = \"x\"");
        write(dir.path(), "orphan.toml", "handler = \"reply\"\nreply = \"x\"\n[dependencies]\nmissing = \"*\"");

        let registry = registry_for(dir.path());
        let report = registry.load_all().await;
        assert_eq!(report.loaded, vec!["z_base", "a_child"]);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.is_dependency_error());
        assert_eq!(registry.dependents("z_base"), vec!["a_child"]);
    }

    #[tokio::test]
    async fn load_failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.toml", "handler = \"reply\"\nreply = \"ok\"");
        write(dir.path(), "evil.toml", "handler = \"reply\"\nreply = \"eval(1)\"");
        write(dir.path(), "unknown.toml", "handler = \"nope\"");
        write(dir.path(), "broken.toml", "name = [");

        let registry = registry_for(dir.path());
        let report = registry.load_all().await;
        assert_eq!(report.loaded, vec!["good"]);
        assert_eq!(report.failed.len(), 3);
        assert!(report.failed.iter().any(|(_, e)| matches!(e, PluginError::SecurityViolation { .. })));
    }

    #[tokio::test]
    async fn disable_runs_deactivate_best_effort() {
        let plugin = Arc::new(Counting::default());
        let registry = PluginRegistry::default();
        registry
            .register_builtin(PluginManifest::new("c"), plugin.clone())
            .unwrap();
        registry.enable("c").await.unwrap();
        assert_eq!(plugin.registered.load(Ordering::SeqCst), 1);

        assert!(registry.disable("c").await.unwrap());
        assert!(!registry.disable("c").await.unwrap());
        assert_eq!(plugin.deactivated.load(Ordering::SeqCst), 1);
        assert!(!registry.is_active("c"));
        assert!(registry.contains("c"));
        assert_eq!(registry.health("c"), Some(HealthStatus::Disabled));
        assert!(matches!(registry.disable("zz").await, Err(PluginError::NotFound(_))));
    }

    #[tokio::test]
    async fn reload_restores_enabled_state_and_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "hi.toml", "handler = \"reply\"\nreply = \"one\"");
        let registry = registry_for(dir.path());
        registry.load_all().await;
        registry.enable("hi").await.unwrap();

        write(dir.path(), "hi.toml", "handler = \"reply\"\nreply = \"two\"\nversion = \"1.1.0\"");
        assert_eq!(registry.reload("hi").await.unwrap(), "hi");
        assert!(registry.is_active("hi"));
        assert_eq!(registry.info("hi").unwrap().manifest.version, Version::new(1, 1, 0));

        fs::write(&path, "name = [").unwrap();
        assert!(registry.reload("hi").await.is_err());
        assert!(!registry.contains("hi"));
    }

    #[tokio::test]
    async fn filesystem_changes_map_to_operations() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry_for(dir.path());

        let path = write(dir.path(), "new.toml", "handler = \"reply\"\nreply = \"hey\"");
        let change = registry.classify_change(&path, true).unwrap();
        assert_eq!(change, PluginChange::Added(path.clone()));
        registry.apply_change(change).await.unwrap();
        assert!(registry.is_active("new"));

        assert_eq!(
            registry.classify_change(&path, true),
            Some(PluginChange::Modified("new".into()))
        );

        fs::remove_file(&path).unwrap();
        let change = registry.classify_change(&path, false).unwrap();
        registry.apply_change(change).await.unwrap();
        assert!(!registry.contains("new"));

        assert_eq!(registry.classify_change(&dir.path().join("x.txt"), true), None);
        assert_eq!(registry.classify_change(&path, false), None);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_escalate_and_success_recovers() {
        let registry = PluginRegistry::default();
        registry
            .register_builtin(PluginManifest::new("f"), Arc::new(Counting::default()))
            .unwrap();
        assert_eq!(registry.admit("f"), Admission::Inactive);
        registry.enable("f").await.unwrap();
        assert_eq!(registry.admit("f"), Admission::Ready);

        for n in 1..=3 {
            assert_eq!(registry.record_failure("f", Duration::from_millis(5), "boom"), n);
        }
        assert_eq!(registry.admit("f"), Admission::Critical);

        registry.record_success("f", Duration::from_millis(5));
        assert_eq!(registry.admit("f"), Admission::Ready);
        let info = registry.info("f").unwrap();
        assert_eq!(info.metrics.executions, 4);
        assert_eq!(info.health.total_errors, 3);

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(registry.cleanup_metrics(Duration::from_secs(60)), 1);
        assert_eq!(registry.info("f").unwrap().metrics.executions, 0);
    }

    #[tokio::test]
    async fn health_sweep_recovers_probe_less_plugins() {
        let registry = PluginRegistry::default();
        registry
            .register_builtin(PluginManifest::new("h"), Arc::new(Counting::default()))
            .unwrap();
        registry.enable("h").await.unwrap();
        registry.record_failure("h", Duration::ZERO, "once");
        assert_eq!(registry.health("h"), Some(HealthStatus::Warning));

        assert_eq!(registry.health_sweep().await, 1);
        assert_eq!(registry.health("h"), Some(HealthStatus::Warning));

        registry.record_success("h", Duration::ZERO);
        registry.health_sweep().await;
        assert_eq!(registry.health("h"), Some(HealthStatus::Healthy));
    }
}
