//! Content extraction.
//!
//! Text can hide in many places of a message body. Each place has its own
//! extractor; they are tried in priority order and the first non-empty result
//! wins. Extractors never fail, they just return `None`.

use serde_json::Value;

/// A single extraction strategy over a message body.
pub type Extractor = fn(&Value) -> Option<String>;

/// Extractors in priority order.
pub const EXTRACTORS: &[Extractor] = &[
    native_flow,
    button_selection,
    conversation,
    extended_text,
    media_caption,
    view_once,
];

/// Wrapper envelopes that may contain a quick-reply payload.
const NATIVE_FLOW_WRAPPERS: &[&str] = &["", "/viewOnceMessage/message", "/ephemeralMessage/message"];

const BUTTON_PATHS: &[&str] = &[
    "/templateButtonReplyMessage/selectedId",
    "/listResponseMessage/singleSelectReply/selectedRowId",
    "/buttonsResponseMessage/selectedButtonId",
];

const CAPTION_PATHS: &[&str] = &[
    "/imageMessage/caption",
    "/videoMessage/caption",
    "/documentMessage/caption",
    "/audioMessage/caption",
];

/// Returns the first non-empty text found in `message`.
pub fn extract_content(message: &Value) -> Option<String> {
    EXTRACTORS.iter().find_map(|extract| extract(message))
}

/// Trimmed, non-empty string at a JSON pointer.
pub(crate) fn text_at(value: &Value, pointer: &str) -> Option<String> {
    let text = value.pointer(pointer)?.as_str()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn first_text_at(value: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| text_at(value, p))
}

/// The `id` inside a quick-reply `paramsJson` string.
pub fn native_flow(message: &Value) -> Option<String> {
    NATIVE_FLOW_WRAPPERS.iter().find_map(|wrapper| {
        let pointer =
            format!("{wrapper}/interactiveResponseMessage/nativeFlowResponseMessage/paramsJson");
        let params = message.pointer(&pointer)?.as_str()?;
        let parsed: Value = serde_json::from_str(params).ok()?;
        text_at(&parsed, "/id")
    })
}

/// Selected button or list row id.
pub fn button_selection(message: &Value) -> Option<String> {
    first_text_at(message, BUTTON_PATHS)
}

pub fn conversation(message: &Value) -> Option<String> {
    text_at(message, "/conversation")
}

pub fn extended_text(message: &Value) -> Option<String> {
    text_at(message, "/extendedTextMessage/text")
}

/// Caption of an image, video, document or audio message.
pub fn media_caption(message: &Value) -> Option<String> {
    first_text_at(message, CAPTION_PATHS)
}

/// Content nested inside a view-once envelope.
pub fn view_once(message: &Value) -> Option<String> {
    let inner = message.pointer("/viewOnceMessage/message")?;
    media_caption(inner)
        .or_else(|| button_selection(inner))
        .or_else(|| conversation(inner))
        .or_else(|| extended_text(inner))
}
