// ABOUTME: Wire frame format for the sandbox execution service
// ABOUTME: Encodes the fixed outbound request sequence and tolerantly decodes inbound payloads

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Frame fields understood by the decoder
const KNOWN_FIELDS: [&str; 7] = ["role", "type", "content", "start", "end", "auth", "status"];

/// Status content that terminates a response
pub const STATUS_COMPLETE: &str = "complete";

/// One JSON object on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<bool>,
}

impl Frame {
    fn user(kind: &str) -> Self {
        Self {
            role: Some("user".to_string()),
            kind: Some(kind.to_string()),
            ..Self::default()
        }
    }

    pub fn auth() -> Self {
        Self {
            auth: Some(true),
            ..Self::user("auth")
        }
    }

    pub fn message_start() -> Self {
        Self {
            start: Some(true),
            ..Self::user("message")
        }
    }

    pub fn message_content(text: &str) -> Self {
        Self {
            content: Some(Value::String(text.to_string())),
            ..Self::user("message")
        }
    }

    pub fn message_end() -> Self {
        Self {
            end: Some(true),
            ..Self::user("message")
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The four frames sent for one request, in transmission order
pub fn request_frames(text: &str) -> [Frame; 4] {
    [
        Frame::auth(),
        Frame::message_start(),
        Frame::message_content(text),
        Frame::message_end(),
    ]
}

/// Decoded inbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Auth,
    MessageStart,
    /// A response fragment; `end` is set when the same frame also closes the message
    MessageContent { text: String, end: bool },
    MessageEnd,
    /// Status announcement; frames carrying only metadata decode to an empty status.
    /// `end` is set when the frame also closes the message.
    Status { text: String, end: bool },
    /// Anything that is not a recognizable frame, kept verbatim
    Opaque(String),
}

impl InboundFrame {
    /// Decode a text payload. Never fails: unrecognized input becomes `Opaque`.
    pub fn decode(raw: &str) -> Self {
        let object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            _ => return InboundFrame::Opaque(raw.to_string()),
        };

        if !KNOWN_FIELDS.iter().any(|field| object.contains_key(*field)) {
            return InboundFrame::Opaque(raw.to_string());
        }

        let kind = object.get("type").and_then(Value::as_str);
        let content = object.get("content").filter(|v| !v.is_null()).map(render_text);
        let end = flag(&object, "end");

        if kind == Some("status") {
            return InboundFrame::Status {
                text: content.unwrap_or_default(),
                end,
            };
        }
        let status = object.get("status").filter(|v| !v.is_null()).map(render_text);
        let status_complete = status.as_deref() == Some(STATUS_COMPLETE);

        if let Some(text) = content {
            return InboundFrame::MessageContent {
                text,
                end: end || status_complete,
            };
        }
        if let Some(text) = status {
            return InboundFrame::Status { text, end };
        }
        if flag(&object, "start") {
            return InboundFrame::MessageStart;
        }
        if end {
            return InboundFrame::MessageEnd;
        }
        if kind == Some("auth") || object.contains_key("auth") {
            return InboundFrame::Auth;
        }

        InboundFrame::Status {
            text: String::new(),
            end: false,
        }
    }

    /// Whether this frame terminates the response
    pub fn is_terminal(&self) -> bool {
        match self {
            InboundFrame::MessageEnd => true,
            InboundFrame::MessageContent { end, .. } => *end,
            InboundFrame::Status { text, end } => *end || text == STATUS_COMPLETE,
            _ => false,
        }
    }

    /// Text this frame contributes to the aggregated response
    pub fn fragment(&self) -> Option<&str> {
        match self {
            InboundFrame::MessageContent { text, .. } => Some(text),
            InboundFrame::Opaque(raw) => Some(raw),
            _ => None,
        }
    }
}

fn flag(object: &Map<String, Value>, key: &str) -> bool {
    object.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// Strings as-is, anything else as compact JSON
fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
