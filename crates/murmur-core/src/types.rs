use serde::{Deserialize, Serialize};

/// A single turn in a conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One segment of a feed message payload.
///
/// Only `text` segments carry content this system reads; other kinds
/// (images, stickers, ...) deserialize fine and are skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: SegmentData,
}

impl Segment {
    /// A `text` segment carrying the given content.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            data: SegmentData {
                text: Some(content.into()),
            },
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// An inbound event pulled from the feed.
///
/// The shape is validated at the boundary: events that fail to deserialize
/// are skipped by the poll loop, and events that deserialize but are not
/// private text messages are ignored by the dispatcher. Unknown fields are
/// tolerated; the upstream feed attaches extras this system never reads.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail_type: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message: Vec<Segment>,
}

impl InboundEvent {
    /// True for the only event class this system processes.
    pub fn is_private_message(&self) -> bool {
        self.kind == "message" && self.detail_type == "private"
    }

    /// Concatenate all `text` segments in payload order.
    ///
    /// Returns `None` when the payload carries no text segments at all
    /// (e.g. a pure image message).
    pub fn text(&self) -> Option<String> {
        let mut parts: Vec<&str> = Vec::new();
        for segment in &self.message {
            if segment.kind == "text" {
                if let Some(text) = segment.data.text.as_deref() {
                    parts.push(text);
                }
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}

/// A reply handed back to the transport for delivery.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    pub user_id: String,
    pub detail_type: String,
    pub message: Vec<Segment>,
}

impl OutboundMessage {
    /// A private text reply to the given user.
    pub fn private_text(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            detail_type: "private".to_string(),
            message: vec![Segment::text(text)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_event(json: serde_json::Value) -> InboundEvent {
        serde_json::from_value(json).expect("event should deserialize")
    }

    #[test]
    fn text_concatenates_segments_in_order() {
        let event = private_event(serde_json::json!({
            "type": "message",
            "detail_type": "private",
            "user_id": "wx_1",
            "message_id": "m1",
            "message": [
                {"type": "text", "data": {"text": "hello "}},
                {"type": "image", "data": {"file": "cat.png"}},
                {"type": "text", "data": {"text": "world"}},
            ],
        }));
        assert!(event.is_private_message());
        assert_eq!(event.text().as_deref(), Some("hello world"));
    }

    #[test]
    fn text_is_none_without_text_segments() {
        let event = private_event(serde_json::json!({
            "type": "message",
            "detail_type": "private",
            "user_id": "wx_1",
            "message": [{"type": "image", "data": {"file": "cat.png"}}],
        }));
        assert_eq!(event.text(), None);
    }

    #[test]
    fn group_message_is_not_private() {
        let event = private_event(serde_json::json!({
            "type": "message",
            "detail_type": "group",
            "user_id": "wx_1",
            "message": [],
        }));
        assert!(!event.is_private_message());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let event = private_event(serde_json::json!({
            "type": "notice",
            "detail_type": "friend_add",
            "sub_type": "invite",
            "time": 1_700_000_000,
        }));
        assert!(!event.is_private_message());
        assert!(event.message.is_empty());
    }

    #[test]
    fn outbound_serializes_to_feed_shape() {
        let reply = OutboundMessage::private_text("wx_1", "hi");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "user_id": "wx_1",
                "detail_type": "private",
                "message": [{"type": "text", "data": {"text": "hi"}}],
            })
        );
    }
}
