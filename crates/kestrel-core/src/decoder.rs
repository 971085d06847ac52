//! The seam between protocol adapters and the runtime.

use std::sync::Arc;

use serde_json::Value;

use crate::message::CanonicalMessage;
use crate::transport::BoxedTransport;

/// Turns a raw inbound event into a [`CanonicalMessage`].
///
/// Returning `None` means the event is malformed or uninteresting and is
/// dropped without a reply.
pub trait EventDecoder: Send + Sync + 'static {
    /// Short adapter name used in logs.
    fn name(&self) -> &'static str;

    /// Decodes `raw`, binding replies to `transport`.
    fn decode(&self, raw: &Value, transport: &BoxedTransport) -> Option<CanonicalMessage>;

    /// Decodes every message carried by `raw`. Batch-capable adapters
    /// override this; the default yields at most one message.
    fn decode_all(&self, raw: &Value, transport: &BoxedTransport) -> Vec<CanonicalMessage> {
        self.decode(raw, transport).into_iter().collect()
    }
}

/// A shareable decoder handle.
pub type BoxedDecoder = Arc<dyn EventDecoder>;
