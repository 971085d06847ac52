//! Handler catalog.
//!
//! Handler code is compiled in; manifests only name it. The catalog maps a
//! handler kind to a factory that builds a fresh handler object from the
//! manifest, so every load or reload yields a new instance.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kestrel_core::BoxError;

use super::builtin::ReplyPlugin;
use super::core::{BoxedPlugin, CommandPlugin};
use super::manifest::PluginManifest;
use crate::error::{PluginError, PluginResult};

/// Builds a handler object for a manifest.
pub type HandlerFactory =
    Arc<dyn Fn(&PluginManifest) -> Result<BoxedPlugin, BoxError> + Send + Sync>;

/// Handler kind name of the built-in template responder.
pub const REPLY_KIND: &str = "reply";

#[derive(Clone)]
pub struct HandlerCatalog {
    factories: HashMap<String, HandlerFactory>,
}

impl Default for HandlerCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerCatalog {
    /// A catalog holding only the `reply` kind.
    pub fn new() -> Self {
        let mut catalog = Self {
            factories: HashMap::new(),
        };
        catalog.register(REPLY_KIND, |m: &PluginManifest| {
            Ok(Arc::new(ReplyPlugin::from_manifest(m)?) as BoxedPlugin)
        });
        catalog
    }

    /// Registers `factory` under `kind`, replacing any previous entry.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PluginManifest) -> Result<BoxedPlugin, BoxError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    /// Registers a handler type constructed with `Default` for every load.
    pub fn register_default<P>(&mut self, kind: impl Into<String>) -> &mut Self
    where
        P: CommandPlugin + Default,
    {
        self.register(kind, |_| Ok(Arc::new(P::default()) as BoxedPlugin))
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginManifest) -> Result<BoxedPlugin, BoxError> + Send + Sync + 'static,
    {
        self.register(kind, factory);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Builds the handler named by `manifest.handler`.
    pub fn instantiate(&self, manifest: &PluginManifest) -> PluginResult<BoxedPlugin> {
        let factory = self
            .factories
            .get(&manifest.handler)
            .ok_or_else(|| PluginError::UnknownHandler {
                plugin: manifest.name.clone(),
                handler: manifest.handler.clone(),
            })?;
        factory(manifest).map_err(|e| PluginError::RegisterFailed {
            plugin: manifest.name.clone(),
            reason: e.to_string(),
        })
    }
}

impl fmt::Debug for HandlerCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCatalog")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_kind_is_built_in() {
        let catalog = HandlerCatalog::new();
        assert!(catalog.contains(REPLY_KIND));

        let mut manifest = PluginManifest::new("hi");
        manifest.handler = REPLY_KIND.into();
        manifest.reply = Some("hello".into());
        assert!(catalog.instantiate(&manifest).is_ok());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let catalog = HandlerCatalog::new();
        let manifest = PluginManifest::new("mystery");
        let err = catalog.instantiate(&manifest).err().unwrap();
        assert!(matches!(err, PluginError::UnknownHandler { handler, .. } if handler == "mystery"));
    }

    #[test]
    fn factory_errors_surface_as_register_failures() {
        let catalog = HandlerCatalog::new()
            .with("broken", |_| Err::<BoxedPlugin, BoxError>("no backend".into()));
        let mut manifest = PluginManifest::new("b");
        manifest.handler = "broken".into();
        let err = catalog.instantiate(&manifest).err().unwrap();
        assert!(matches!(err, PluginError::RegisterFailed { .. }));
    }
}
