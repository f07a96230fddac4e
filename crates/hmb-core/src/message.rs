//! Bus messages and the open acknowledgment.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server error reported for a queue that does not exist.
pub const QUEUE_NOT_FOUND: &str = "queue not found";

/// Message type tag.
///
/// `HEARTBEAT` and `EOF` are protocol markers, `TOUCH` is the zero-payload
/// message that implicitly creates a queue. Any other tag is an application
/// message and is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    /// Ordinary message (`MSG`).
    Msg,
    /// Keep-alive emitted by the server while a blocking receive is pending.
    Heartbeat,
    /// End of the currently available backlog.
    Eof,
    /// Queue creation marker.
    Touch,
    /// Application-defined tag.
    Custom(String),
}

impl MessageType {
    /// Wire representation of the tag.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Msg => "MSG",
            Self::Heartbeat => "HEARTBEAT",
            Self::Eof => "EOF",
            Self::Touch => "TOUCH",
            Self::Custom(s) => s,
        }
    }

    /// Whether this tag is a protocol marker rather than a payload.
    #[must_use]
    pub const fn is_marker(&self) -> bool {
        matches!(self, Self::Heartbeat | Self::Eof)
    }
}

impl From<String> for MessageType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "MSG" => Self::Msg,
            "HEARTBEAT" => Self::Heartbeat,
            "EOF" => Self::Eof,
            "TOUCH" => Self::Touch,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for MessageType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<MessageType> for String {
    fn from(t: MessageType) -> Self {
        match t {
            MessageType::Custom(s) => s,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bus event.
///
/// Fields the protocol does not name are kept in `extra` so a decoded
/// message re-encodes to the same document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Queue the message belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Optional tag used for server-side topic selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Sequence number assigned by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starttime: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endtime: Option<String>,

    /// Opaque payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Unrecognized fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Frame a payload into the minimal send envelope.
    #[must_use]
    pub fn new(kind: impl Into<MessageType>, queue: impl Into<String>, data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::bare(kind.into(), Some(queue.into()))
        }
    }

    /// Ordinary `MSG` message.
    #[must_use]
    pub fn msg(queue: impl Into<String>, data: Value) -> Self {
        Self::new(MessageType::Msg, queue, data)
    }

    /// Zero-payload message that creates `queue` on the server.
    #[must_use]
    pub fn touch(queue: impl Into<String>) -> Self {
        Self::bare(MessageType::Touch, Some(queue.into()))
    }

    /// Message with only a type tag (e.g. `HEARTBEAT`, `EOF`).
    #[must_use]
    pub fn marker(kind: MessageType) -> Self {
        Self::bare(kind, None)
    }

    fn bare(kind: MessageType, queue: Option<String>) -> Self {
        Self {
            kind,
            queue,
            topic: None,
            seq: None,
            sender: None,
            starttime: None,
            endtime: None,
            data: None,
            extra: Map::new(),
        }
    }

    /// Set the topic.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the sequence number.
    #[must_use]
    pub const fn with_seq(mut self, seq: i64) -> Self {
        self.seq = Some(seq);
        self
    }

    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.kind == MessageType::Heartbeat
    }

    #[must_use]
    pub fn is_eof(&self) -> bool {
        self.kind == MessageType::Eof
    }

    /// Queue and sequence number, when the message carries both.
    #[must_use]
    pub fn position(&self) -> Option<(&str, i64)> {
        match (&self.queue, self.seq) {
            (Some(queue), Some(seq)) => Some((queue.as_str(), seq)),
            _ => None,
        }
    }
}

/// Server reply to `POST /open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAck {
    /// Session id, used in every subsequent request path.
    pub sid: String,
    /// Client id, reused on reopen.
    pub cid: String,
    /// Per-queue resolution.
    #[serde(default)]
    pub queue: BTreeMap<String, QueueAck>,
}

/// Per-queue part of the open acknowledgment: either the next sequence
/// number or an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueueAck {
    /// Whether the server reported the queue as missing.
    #[must_use]
    pub fn is_queue_not_found(&self) -> bool {
        self.error.as_deref() == Some(QUEUE_NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_type_tags() {
        assert_eq!(MessageType::from("HEARTBEAT"), MessageType::Heartbeat);
        assert_eq!(MessageType::from("EOF"), MessageType::Eof);
        assert_eq!(
            MessageType::from("EMSC_MSG"),
            MessageType::Custom("EMSC_MSG".to_string())
        );
        assert_eq!(String::from(MessageType::Touch), "TOUCH");
        assert!(MessageType::Heartbeat.is_marker());
        assert!(!MessageType::Msg.is_marker());
    }

    #[test]
    fn test_framing_omits_empty_fields() {
        let msg = Message::msg("Q1", json!({"content": "hi"})).with_topic("alerts");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "MSG", "queue": "Q1", "topic": "alerts", "data": {"content": "hi"}})
        );

        let touch = serde_json::to_value(Message::touch("Q2")).unwrap();
        assert_eq!(touch, json!({"type": "TOUCH", "queue": "Q2"}));
    }

    #[test]
    fn test_unknown_fields_survive() {
        let raw = json!({"type": "MSG", "queue": "Q", "seq": 4, "priority": 7});
        let msg: Message = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(msg.position(), Some(("Q", 4)));
        assert_eq!(msg.extra.get("priority"), Some(&json!(7)));
        assert_eq!(serde_json::to_value(&msg).unwrap(), raw);
    }

    #[test]
    fn test_open_ack_parsing() {
        let ack: OpenAck = serde_json::from_value(json!({
            "sid": "S1",
            "cid": "C1",
            "queue": {"Q1": {"seq": 97}, "Q2": {"error": "queue not found"}}
        }))
        .unwrap();
        assert_eq!(ack.queue["Q1"].seq, Some(97));
        assert!(ack.queue["Q2"].is_queue_not_found());
        assert!(!ack.queue["Q1"].is_queue_not_found());
    }
}
