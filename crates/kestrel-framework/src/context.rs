//! Contexts handed to plugins.
//!
//! - [`Services`]: a type-keyed map of shared services assembled by the host
//!   at startup (blocklist, access oracle, anything the host adds).
//! - [`RegisterContext`]: passed to a plugin's `register` hook when it is
//!   enabled. Carries the plugin's `[config]` table and the services.
//! - [`ExecutionContext`]: built by the dispatch pipeline for every call.
//!   Read-only; plugins never touch registry internals through it.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kestrel_core::CanonicalMessage;
use serde_json::Value;

/// Type-erased service value.
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

// =============================================================================
// Services
// =============================================================================

/// Shared services, keyed by concrete type.
///
/// ```rust,ignore
/// let mut services = Services::new();
/// services.insert(Arc::new(Blocklist::in_memory()));
/// let blocklist: Arc<Blocklist> = services.get().unwrap();
/// ```
#[derive(Default, Clone)]
pub struct Services {
    map: HashMap<TypeId, ServiceArc>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service`, replacing any previous service of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.map.insert(TypeId::of::<T>(), service);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<T: Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.insert(service);
        self
    }

    /// Looks up the service of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|svc| svc.clone().downcast::<T>().ok())
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("count", &self.map.len())
            .finish()
    }
}

// =============================================================================
// RegisterContext
// =============================================================================

/// Context passed to [`CommandPlugin::register`](crate::CommandPlugin::register).
#[derive(Debug, Clone)]
pub struct RegisterContext {
    plugin: String,
    config: Arc<Value>,
    services: Arc<Services>,
}

impl RegisterContext {
    pub(crate) fn new(plugin: &str, config: Arc<Value>, services: Arc<Services>) -> Self {
        Self {
            plugin: plugin.to_string(),
            config,
            services,
        }
    }

    /// Name of the plugin being registered.
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Raw `[config]` table of the plugin manifest.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// Deserialises the `[config]` table into `T`.
    ///
    /// Use `#[serde(default)]` on `T` to make every field optional.
    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        T::deserialize(self.config.as_ref())
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services.get()
    }
}

// =============================================================================
// ExecutionContext
// =============================================================================

/// Per-call context built by the dispatcher.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Name of the plugin being executed.
    pub plugin: String,
    pub sender: String,
    pub sender_number: String,
    pub push_name: String,
    pub command: String,
    pub args: Vec<String>,
    /// Complete extracted text including prefix and command.
    pub full_text: String,
    pub chat_id: String,
    pub is_group: bool,
    /// Whether the sender is a configured or persisted owner.
    pub is_owner: bool,
    pub is_premium: bool,
    pub message: Arc<CanonicalMessage>,
    config: Arc<Value>,
    services: Arc<Services>,
}

impl ExecutionContext {
    /// Builds the context for `plugin` handling `message`.
    pub fn new(
        plugin: &str,
        message: Arc<CanonicalMessage>,
        config: Arc<Value>,
        services: Arc<Services>,
    ) -> Self {
        Self {
            plugin: plugin.to_string(),
            sender: message.sender.clone(),
            sender_number: message.sender_number.clone(),
            push_name: message.push_name.clone(),
            command: message.command.clone(),
            args: message.args.clone(),
            full_text: message.text.clone(),
            chat_id: message.chat_id.clone(),
            is_group: message.is_group,
            is_owner: false,
            is_premium: false,
            message,
            config,
            services,
        }
    }

    /// Sets the authorization flags.
    pub fn with_access(mut self, is_owner: bool, is_premium: bool) -> Self {
        self.is_owner = is_owner;
        self.is_premium = is_premium;
        self
    }

    /// Raw `[config]` table of the plugin manifest.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn get_config<T>(&self) -> serde_json::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        T::deserialize(self.config.as_ref())
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.services.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Greeter(&'static str);

    #[test]
    fn services_round_trip_by_type() {
        let services = Services::new().with(Arc::new(Greeter("hi")));
        assert!(services.contains::<Greeter>());
        assert_eq!(services.get::<Greeter>().unwrap().0, "hi");
        assert!(services.get::<String>().is_none());
    }

    #[test]
    fn register_context_reads_config() {
        #[derive(serde::Deserialize)]
        struct Cfg {
            greeting: String,
        }
        let ctx = RegisterContext::new(
            "hello",
            Arc::new(serde_json::json!({"greeting": "hey"})),
            Arc::new(Services::new()),
        );
        assert_eq!(ctx.plugin(), "hello");
        assert_eq!(ctx.get_config::<Cfg>().unwrap().greeting, "hey");
    }
}
