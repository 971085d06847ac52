//! The message normalizer.
//!
//! [`WhatsAppDecoder`] turns one raw inbound event into a
//! [`CanonicalMessage`], or drops it.
//!
//! # Pipeline
//!
//! ```text
//! raw ──► items ──► extract_content ──► message_type ──► parse_command
//!              │                                                   │
//!          (malformed: None)                        relations, flags, reply handle
//! ```
//!
//! Events are dropped when the shape is unrecognised, the key has no id, the
//! item is a bare key-distribution or poll-update artifact, or there is no
//! text and the message is not media.

use std::sync::Arc;

use kestrel_core::{
    BoxedTransport, CanonicalMessage, EditInfo, EventDecoder, QuotedMessage, ReplyHandle,
};
use serde_json::Value;
use tracing::{debug, trace};

use crate::classify::{self, IGNORED_TYPES, PROTOCOL_EDIT, PROTOCOL_REVOKE};
use crate::command::parse_command;
use crate::config::NormalizerConfig;
use crate::correlation::{Correlation, CorrelationLog};
use crate::extract::{extract_content, text_at};
use crate::model::{RawItem, items};

const GROUP_SUFFIX: &str = "@g.us";
const BROADCAST_SUFFIX: &str = "status@broadcast";
const BOT_ID_PREFIX: &str = "3EB0";
const BOT_ID_LEN: usize = 22;
const BOT_PAYLOAD_KEYS: &[&str] = &["templateMessage", "interactiveMessage", "buttonsMessage"];

/// Decoder for multi-device chat events.
pub struct WhatsAppDecoder {
    config: NormalizerConfig,
    correlations: Arc<CorrelationLog>,
}

impl WhatsAppDecoder {
    pub fn new(config: NormalizerConfig) -> Self {
        let correlations = Arc::new(CorrelationLog::new(config.correlation_capacity));
        Self {
            config,
            correlations,
        }
    }

    /// The id correlation log fed by this decoder.
    pub fn correlations(&self) -> &Arc<CorrelationLog> {
        &self.correlations
    }

    /// Normalises the first usable item of `raw`, binding replies to
    /// `transport`.
    pub fn normalize(&self, raw: &Value, transport: &BoxedTransport) -> Option<CanonicalMessage> {
        items(raw)
            .into_iter()
            .find_map(|(item, source)| self.normalize_item(&item, source, transport))
    }

    /// Normalises every usable item of `raw`, in batch order.
    pub fn normalize_all(&self, raw: &Value, transport: &BoxedTransport) -> Vec<CanonicalMessage> {
        let batch = items(raw);
        if batch.is_empty() {
            trace!("Dropping event with unrecognised shape");
            return Vec::new();
        }
        batch
            .into_iter()
            .filter_map(|(item, source)| self.normalize_item(&item, source, transport))
            .collect()
    }

    fn normalize_item(
        &self,
        item: &RawItem,
        source: &Value,
        transport: &BoxedTransport,
    ) -> Option<CanonicalMessage> {
        if item.key.id.is_empty() {
            trace!("Dropping event without message id");
            return None;
        }

        let body = &item.message;
        let text = extract_content(body).unwrap_or_default();
        let message_type = classify::message_type(body);

        if text.is_empty() && IGNORED_TYPES.contains(&message_type.as_str()) {
            trace!(message_type = %message_type, "Dropping protocol artifact");
            return None;
        }

        let kind = classify::kind_of(&message_type);
        if text.is_empty() && !kind.is_media() {
            trace!(message_type = %message_type, "Dropping message without content");
            return None;
        }

        let parsed = parse_command(&text, &self.config.prefixes, self.config.require_prefix);

        let chat_id = item.key.remote_jid.clone();
        let participant = item.participant().to_string();
        let is_group = chat_id.ends_with(GROUP_SUFFIX);
        let sender = if is_group {
            participant.clone()
        } else {
            chat_id.clone()
        };
        let timestamp = item.timestamp_secs();

        self.correlations.record(
            &item.key.id,
            Correlation {
                participant: participant.clone(),
                timestamp,
                chat_id: chat_id.clone(),
            },
        );

        let reply = ReplyHandle::new(transport.clone(), chat_id.clone(), Some(source.clone()));
        let mut msg = CanonicalMessage::new(item.key.id.clone(), chat_id, sender, reply);

        msg.push_name = item.push_name.clone().unwrap_or_default();
        msg.timestamp = timestamp;
        msg.kind = kind;
        msg.text = text;
        msg.content = parsed.content;
        msg.prefix = parsed.prefix;
        msg.command = parsed.command;
        msg.args = parsed.args;
        msg.is_cmd = parsed.is_cmd;

        msg.quoted = quoted_message(body);
        msg.mentions = mentions(body, &message_type);
        msg.edited = edit_info(body);
        msg.is_group = is_group;
        msg.is_broadcast = msg.chat_id.ends_with(BROADCAST_SUFFIX);
        msg.from_me = item.key.from_me;
        msg.is_bot = is_bot(item);
        msg.is_forwarded = context_info(body, &message_type)
            .and_then(|ctx| ctx.get("isForwarded"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        msg.is_deleted = classify::protocol_type(body) == Some(PROTOCOL_REVOKE);
        msg.is_status_mention = body.get("groupStatusMentionMessage").is_some();
        msg.message_type = message_type;
        msg.raw = source.clone();

        if msg.is_cmd {
            debug!(
                id = %msg.id,
                sender = %msg.sender_number,
                command = %msg.command,
                "Command message normalised"
            );
        }
        Some(msg)
    }
}

impl EventDecoder for WhatsAppDecoder {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    fn decode(&self, raw: &Value, transport: &BoxedTransport) -> Option<CanonicalMessage> {
        self.normalize(raw, transport)
    }

    fn decode_all(&self, raw: &Value, transport: &BoxedTransport) -> Vec<CanonicalMessage> {
        self.normalize_all(raw, transport)
    }
}

// ─── Relations and flags ──────────────────────────────────────────────────────

/// `contextInfo` of the main content node, falling back to extended text.
fn context_info<'a>(body: &'a Value, message_type: &str) -> Option<&'a Value> {
    classify::content_type(body)
        .and_then(|ct| body.get(ct))
        .or_else(|| body.get(message_type))
        .and_then(|node| node.get("contextInfo"))
        .or_else(|| body.pointer("/extendedTextMessage/contextInfo"))
}

fn quoted_message(body: &Value) -> Option<QuotedMessage> {
    let ctx = body.pointer("/extendedTextMessage/contextInfo")?;
    let quoted = ctx.get("quotedMessage")?;
    let sender = ctx.get("participant")?.as_str()?.to_string();
    Some(QuotedMessage {
        id: text_at(ctx, "/stanzaId").unwrap_or_default(),
        sender,
        text: extract_content(quoted).unwrap_or_default(),
    })
}

fn mentions(body: &Value, message_type: &str) -> Vec<String> {
    context_info(body, message_type)
        .and_then(|ctx| ctx.get("mentionedJid"))
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn edit_info(body: &Value) -> Option<EditInfo> {
    let edited = body.pointer("/protocolMessage/editedMessage");
    if edited.is_none() && classify::protocol_type(body) != Some(PROTOCOL_EDIT) {
        return None;
    }
    let text = edited
        .and_then(|e| text_at(e, "/extendedTextMessage/text").or_else(|| text_at(e, "/conversation")))
        .unwrap_or_default();
    Some(EditInfo {
        target_id: text_at(body, "/protocolMessage/key/id"),
        text,
    })
}

fn is_bot(item: &RawItem) -> bool {
    let id = &item.key.id;
    (id.starts_with(BOT_ID_PREFIX) && id.len() == BOT_ID_LEN)
        || item
            .message
            .as_object()
            .is_some_and(|body| BOT_PAYLOAD_KEYS.iter().any(|k| body.contains_key(*k)))
}
