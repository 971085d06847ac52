//! Outbound transport capability.
//!
//! The chat-protocol client lives outside this workspace. Everything Kestrel
//! needs from it is a single operation: send some text to a destination,
//! optionally quoting an earlier message.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportResult;

/// Options accompanying an outbound message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendOptions {
    /// Raw protocol record of the message being quoted, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<Value>,
    /// Identities to mention.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    /// Transport-specific extras passed through untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl SendOptions {
    /// Options that quote `raw`.
    pub fn quoting(raw: Value) -> Self {
        Self {
            quoted: Some(raw),
            ..Default::default()
        }
    }

    /// Adds a mentioned identity.
    pub fn mention(mut self, id: impl Into<String>) -> Self {
        self.mentions.push(id.into());
        self
    }

    /// Adds a transport-specific extra.
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Overlays `other` on top of `self`. Fields set in `other` win.
    pub fn merged(mut self, other: SendOptions) -> Self {
        if other.quoted.is_some() {
            self.quoted = other.quoted;
        }
        self.mentions.extend(other.mentions);
        self.extra.extend(other.extra);
        self
    }
}

/// The reply capability consumed by the runtime.
///
/// Implementations wrap whatever protocol client is in use. Errors are
/// reported to the caller; the reply handle on a
/// [`CanonicalMessage`](crate::CanonicalMessage) is responsible for logging
/// and swallowing them.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends `content` to `destination`.
    async fn send(
        &self,
        destination: &str,
        content: &str,
        options: SendOptions,
    ) -> TransportResult<()>;
}

/// A shareable transport handle.
pub type BoxedTransport = Arc<dyn Transport>;
