//! Raw inbound event shapes.
//!
//! Events arrive either as a batch notification
//!
//! ```text
//! { "type": "notify", "messages": [ item, ... ] }
//! ```
//!
//! or as a single item:
//!
//! ```text
//! { "key": { "id", "remoteJid", "fromMe", "participant" },
//!   "message": { <contentType>: { ... } },
//!   "pushName": "...", "messageTimestamp": 1700000000 }
//! ```
//!
//! Only the envelope is modelled with serde; the `message` body is kept as a
//! [`Value`] and probed by the extractors.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Addressing information of one raw item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageKey {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "remoteJid")]
    pub remote_jid: String,
    #[serde(default, rename = "fromMe")]
    pub from_me: bool,
    #[serde(default)]
    pub participant: Option<String>,
}

/// One message-shaped record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub key: MessageKey,
    pub message: Value,
    #[serde(default, rename = "pushName")]
    pub push_name: Option<String>,
    #[serde(default, rename = "messageTimestamp")]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub participant: Option<String>,
}

impl RawItem {
    /// Participant from the key, falling back to the item itself.
    pub fn participant(&self) -> &str {
        self.key
            .participant
            .as_deref()
            .or(self.participant.as_deref())
            .unwrap_or("")
    }

    /// Timestamp in seconds; the current time when absent or unreadable.
    pub fn timestamp_secs(&self) -> u64 {
        self.timestamp
            .as_ref()
            .and_then(timestamp_of)
            .unwrap_or_else(now_secs)
    }
}

/// A batch notification carrying one or more items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBatch {
    pub messages: Vec<Value>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// The two accepted inbound shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawEvent {
    Batch(RawBatch),
    Single(RawItem),
}

/// Splits a raw event into the items to normalise.
///
/// Each parsed item comes with its raw JSON, which is kept for quoting.
/// Batch entries that do not parse or carry no message body are skipped.
pub fn items(raw: &Value) -> Vec<(RawItem, &Value)> {
    let usable = |item: &RawItem| item.message.is_object();
    match RawEvent::deserialize(raw) {
        Ok(RawEvent::Batch(_)) => raw
            .get("messages")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        let item = RawItem::deserialize(entry).ok()?;
                        usable(&item).then_some((item, entry))
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Ok(RawEvent::Single(item)) if usable(&item) => vec![(item, raw)],
        _ => Vec::new(),
    }
}

/// Reads a protocol timestamp: a number, a numeric string, or a
/// `{ "low": .., "high": .. }` long.
fn timestamp_of(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        Value::Object(map) => {
            let low = map.get("low")?.as_i64()? as u32 as u64;
            let high = map.get("high").and_then(Value::as_i64).unwrap_or(0) as u32 as u64;
            Some((high << 32) | low)
        }
        _ => None,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
