//! Message type classification.

use kestrel_core::MessageKind;
use serde_json::Value;

/// A structural marker identifying a special message type.
enum Marker {
    /// A non-null value exists at this JSON pointer.
    Present(&'static str),
    /// `protocolMessage.type` equals this code.
    Protocol(u64),
}

/// Special types take priority over the generic content-type lookup.
const SPECIAL_TYPES: &[(Marker, &str)] = &[
    (
        Marker::Present("/interactiveResponseMessage/nativeFlowResponseMessage"),
        "nativeFlowResponse",
    ),
    (Marker::Present("/templateButtonReplyMessage"), "templateButtonReply"),
    (Marker::Present("/listResponseMessage"), "listResponse"),
    (Marker::Present("/buttonsResponseMessage"), "buttonsResponse"),
    (Marker::Present("/stickerMessage"), "stickerMessage"),
    (Marker::Present("/audioMessage"), "audioMessage"),
    (Marker::Present("/reactionMessage"), "reactionMessage"),
    (
        Marker::Present("/pollResultSnapshotMessage"),
        "pollResultSnapshotMessage",
    ),
    (Marker::Present("/pollCreationMessageV3"), "pollCreationMessage"),
    (Marker::Protocol(PROTOCOL_REVOKE), "deletedMessage"),
    (Marker::Protocol(PROTOCOL_EDIT), "editedMessage"),
    (Marker::Present("/pinInChatMessage"), "pinInChatMessage"),
    (Marker::Present("/albumMessage"), "albumMessage"),
    (Marker::Present("/viewOnceMessage"), "viewOnceMessage"),
    (Marker::Present("/documentMessage"), "documentMessage"),
    (
        Marker::Present("/groupStatusMentionMessage"),
        "groupStatusMentionMessage",
    ),
];

/// Types that are dropped when they carry no extractable content.
pub const IGNORED_TYPES: &[&str] = &["senderKeyDistributionMessage", "pollUpdateMessage"];

pub(crate) const PROTOCOL_REVOKE: u64 = 0;
pub(crate) const PROTOCOL_EDIT: u64 = 14;

/// Classifies a message body into its protocol type tag.
pub fn message_type(message: &Value) -> String {
    SPECIAL_TYPES
        .iter()
        .find(|(marker, _)| marker.matches(message))
        .map(|(_, tag)| (*tag).to_string())
        .or_else(|| content_type(message).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// The first key of the body that names a content node.
pub fn content_type(message: &Value) -> Option<&str> {
    message.as_object()?.keys().map(String::as_str).find(|key| {
        (*key == "conversation" || key.contains("Message")) && *key != "senderKeyDistributionMessage"
    })
}

/// The numeric `protocolMessage.type`, accepting the enum names too.
pub fn protocol_type(message: &Value) -> Option<u64> {
    let ty = message.pointer("/protocolMessage/type")?;
    ty.as_u64().or_else(|| match ty.as_str()? {
        "REVOKE" => Some(PROTOCOL_REVOKE),
        "MESSAGE_EDIT" => Some(PROTOCOL_EDIT),
        _ => None,
    })
}

/// Coarse kind of a type tag.
pub fn kind_of(message_type: &str) -> MessageKind {
    match message_type {
        "conversation" | "extendedTextMessage" => MessageKind::Text,
        "imageMessage" => MessageKind::Image,
        "videoMessage" => MessageKind::Video,
        "stickerMessage" => MessageKind::Sticker,
        "audioMessage" => MessageKind::Audio,
        "documentMessage" => MessageKind::Document,
        "reactionMessage" => MessageKind::Reaction,
        "pollUpdateMessage" | "pollCreationMessage" | "pollResultSnapshotMessage" => {
            MessageKind::Poll
        }
        "viewOnceMessage" => MessageKind::ViewOnce,
        "buttonsMessage" | "buttonsResponse" | "listResponse" | "nativeFlowResponse" => {
            MessageKind::Buttons
        }
        "templateButtonReply" | "templateButtonReplyMessage" => MessageKind::Template,
        "contactMessage" => MessageKind::Contact,
        "protocolMessage" | "deletedMessage" | "editedMessage" => MessageKind::Protocol,
        other => MessageKind::Other(other.to_string()),
    }
}

impl Marker {
    fn matches(&self, message: &Value) -> bool {
        match self {
            Self::Present(pointer) => message.pointer(pointer).is_some_and(|v| !v.is_null()),
            Self::Protocol(code) => protocol_type(message) == Some(*code),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn special_markers_take_priority() {
        let msg = json!({
            "messageContextInfo": {},
            "buttonsResponseMessage": {"selectedButtonId": "x"}
        });
        assert_eq!(message_type(&msg), "buttonsResponse");
    }

    #[test]
    fn protocol_codes() {
        assert_eq!(message_type(&json!({"protocolMessage": {"type": 0}})), "deletedMessage");
        assert_eq!(
            message_type(&json!({"protocolMessage": {"type": "MESSAGE_EDIT"}})),
            "editedMessage"
        );
        assert_eq!(message_type(&json!({"protocolMessage": {"type": 5}})), "protocolMessage");
    }

    #[test]
    fn content_type_follows_key_order() {
        let msg = json!({
            "senderKeyDistributionMessage": {},
            "messageContextInfo": {},
            "imageMessage": {"caption": "hi"}
        });
        assert_eq!(content_type(&msg), Some("imageMessage"));
        assert_eq!(message_type(&json!({"conversation": "x"})), "conversation");
    }

    #[test]
    fn unknown_when_nothing_matches() {
        assert_eq!(message_type(&json!({"foo": 1})), "unknown");
        assert_eq!(
            message_type(&json!({"senderKeyDistributionMessage": {}})),
            "unknown"
        );
    }

    #[test]
    fn kinds() {
        assert_eq!(kind_of("extendedTextMessage"), MessageKind::Text);
        assert!(kind_of("stickerMessage").is_media());
        assert!(!kind_of("reactionMessage").is_media());
        assert_eq!(
            kind_of("locationMessage"),
            MessageKind::Other("locationMessage".into())
        );
    }
}
