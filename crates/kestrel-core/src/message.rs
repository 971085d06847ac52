//! The canonical message record.
//!
//! A [`CanonicalMessage`] is the flattened, protocol-independent form of one
//! inbound chat event. It is created by an [`EventDecoder`](crate::EventDecoder)
//! for every event, handed through the dispatch pipeline and discarded
//! afterwards. The only thing that outlives the pipeline is the bound
//! [`ReplyHandle`], which plugins may keep using asynchronously.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::transport::{BoxedTransport, SendOptions};

// =============================================================================
// MessageKind
// =============================================================================

/// Coarse classification of a message, derived from its protocol type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Sticker,
    Audio,
    Document,
    Reaction,
    Poll,
    ViewOnce,
    Buttons,
    Template,
    Contact,
    Protocol,
    /// A type tag without a coarse mapping; the tag is kept verbatim.
    Other(String),
}

impl MessageKind {
    /// Whether the message carries media that may be interesting without text.
    pub fn is_media(&self) -> bool {
        matches!(
            self,
            Self::Image | Self::Video | Self::Audio | Self::Sticker | Self::Document
        )
    }
}

// =============================================================================
// Relational records
// =============================================================================

/// A reference to the message this one replies to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedMessage {
    /// Id of the quoted message.
    pub id: String,
    /// Identity that sent the quoted message.
    pub sender: String,
    /// Text of the quoted message, empty when it had none.
    pub text: String,
}

/// Edit metadata for a message that replaces an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditInfo {
    /// Id of the edited message, when the protocol reports it.
    pub target_id: Option<String>,
    /// New text after the edit.
    pub text: String,
}

// =============================================================================
// ReplyHandle
// =============================================================================

/// A reply capability bound to one chat and one quoted message.
///
/// Sending never fails from the caller's point of view: transport errors are
/// logged and swallowed.
#[derive(Clone)]
pub struct ReplyHandle {
    transport: BoxedTransport,
    destination: String,
    quoted: Option<Value>,
}

impl ReplyHandle {
    /// Binds `transport` to `destination`, quoting `quoted` on every send.
    pub fn new(
        transport: BoxedTransport,
        destination: impl Into<String>,
        quoted: Option<Value>,
    ) -> Self {
        Self {
            transport,
            destination: destination.into(),
            quoted,
        }
    }

    /// The chat this handle replies into.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The underlying transport, for plugins that need to send elsewhere.
    pub fn transport(&self) -> &BoxedTransport {
        &self.transport
    }

    /// Sends `text` as a quoted reply.
    pub async fn send(&self, text: &str) {
        self.send_with(text, SendOptions::default()).await;
    }

    /// Sends `text` as a quoted reply with extra options layered on top.
    pub async fn send_with(&self, text: &str, options: SendOptions) {
        let base = SendOptions {
            quoted: self.quoted.clone(),
            ..Default::default()
        };
        if let Err(e) = self
            .transport
            .send(&self.destination, text, base.merged(options))
            .await
        {
            warn!(destination = %self.destination, error = %e, "Failed to send reply");
        }
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("destination", &self.destination)
            .field("quoting", &self.quoted.is_some())
            .finish()
    }
}

// =============================================================================
// CanonicalMessage
// =============================================================================

/// Normalized representation of one inbound chat event.
///
/// `is_cmd == true` implies a non-empty, lowercase `command`.
#[derive(Debug, Clone)]
pub struct CanonicalMessage {
    // ─── Identifiers ──────────────────────────────────────────────────────────
    pub id: String,
    pub chat_id: String,
    /// Full sender identity (participant in groups, chat id otherwise).
    pub sender: String,
    /// Sender identity with the server and device parts stripped.
    pub sender_number: String,
    pub push_name: String,
    /// Protocol timestamp as delivered, usually seconds since the epoch.
    pub timestamp: u64,

    // ─── Content ──────────────────────────────────────────────────────────────
    /// Protocol type tag, e.g. `conversation` or `imageMessage`.
    pub message_type: String,
    pub kind: MessageKind,
    /// Full extracted text.
    pub text: String,
    /// Text with prefix and command removed.
    pub content: String,
    /// The configured prefix that matched, empty when none did.
    pub prefix: String,
    pub command: String,
    pub args: Vec<String>,
    pub is_cmd: bool,

    // ─── Relations and flags ──────────────────────────────────────────────────
    pub quoted: Option<QuotedMessage>,
    pub mentions: Vec<String>,
    pub edited: Option<EditInfo>,
    pub is_group: bool,
    pub is_broadcast: bool,
    pub from_me: bool,
    pub is_bot: bool,
    pub is_forwarded: bool,
    pub is_deleted: bool,
    pub is_status_mention: bool,

    /// The raw protocol item this message was built from.
    pub raw: Value,
    reply: ReplyHandle,
}

impl CanonicalMessage {
    /// Creates a message with the given identifiers and empty content.
    ///
    /// Decoders fill in the remaining public fields.
    pub fn new(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        sender: impl Into<String>,
        reply: ReplyHandle,
    ) -> Self {
        let sender = sender.into();
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            sender_number: sender_number_of(&sender).to_string(),
            sender,
            push_name: String::new(),
            timestamp: 0,
            message_type: String::new(),
            kind: MessageKind::Text,
            text: String::new(),
            content: String::new(),
            prefix: String::new(),
            command: String::new(),
            args: Vec::new(),
            is_cmd: false,
            quoted: None,
            mentions: Vec::new(),
            edited: None,
            is_group: false,
            is_broadcast: false,
            from_me: false,
            is_bot: false,
            is_forwarded: false,
            is_deleted: false,
            is_status_mention: false,
            raw: Value::Null,
            reply,
        }
    }

    /// The bound reply capability.
    pub fn replier(&self) -> &ReplyHandle {
        &self.reply
    }

    /// Sends `text` back into this message's chat, quoting it.
    pub async fn reply(&self, text: &str) {
        self.reply.send(text).await;
    }

    /// Like [`reply`](Self::reply) with extra send options.
    pub async fn reply_with(&self, text: &str, options: SendOptions) {
        self.reply.send_with(text, options).await;
    }
}

/// Strips the `@server` and `:device` parts of an identity.
///
/// `"62812:3@s.whatsapp.net"` becomes `"62812"`.
pub fn sender_number_of(identity: &str) -> &str {
    let user = identity.split('@').next().unwrap_or(identity);
    user.split(':').next().unwrap_or(user)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::{TransportError, TransportResult};
    use crate::transport::Transport;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, String, SendOptions)>>,
        fail: bool,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, to: &str, text: &str, opts: SendOptions) -> TransportResult<()> {
            if self.fail {
                return Err(TransportError::closed("offline"));
            }
            self.sent.lock().push((to.into(), text.into(), opts));
            Ok(())
        }
    }

    #[test]
    fn sender_number_strips_server_and_device() {
        assert_eq!(sender_number_of("62812@s.whatsapp.net"), "62812");
        assert_eq!(sender_number_of("62812:7@s.whatsapp.net"), "62812");
        assert_eq!(sender_number_of("123@x"), "123");
        assert_eq!(sender_number_of("plain"), "plain");
    }

    #[tokio::test]
    async fn reply_quotes_the_original() {
        let recorder = Arc::new(Recorder::default());
        let handle = ReplyHandle::new(
            recorder.clone(),
            "chat@g.us",
            Some(serde_json::json!({"key": {"id": "A1"}})),
        );
        let msg = CanonicalMessage::new("A1", "chat@g.us", "1@s.whatsapp.net", handle);

        msg.reply_with("hi", SendOptions::default().mention("2@s.whatsapp.net"))
            .await;

        let sent = recorder.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "chat@g.us");
        assert_eq!(sent[0].1, "hi");
        assert!(sent[0].2.quoted.is_some());
        assert_eq!(sent[0].2.mentions, vec!["2@s.whatsapp.net".to_string()]);
    }

    #[tokio::test]
    async fn reply_swallows_transport_errors() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let handle = ReplyHandle::new(recorder.clone(), "1@s.whatsapp.net", None);
        handle.send("lost").await;
        assert!(recorder.sent.lock().is_empty());
    }
}
