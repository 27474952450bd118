//! Inbound and outbound WebSocket frame definitions.
//!
//! Every frame is a JSON object tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_core::types::Message;

/// Frames sent by the client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundFrame {
    /// Subscribe to a topic, optionally resuming after `sequence`.
    Subscribe {
        /// Topic name.
        topic: String,
        /// Last sequence the client already has.
        #[serde(default)]
        sequence: Option<u64>,
    },
    /// Unsubscribe from a topic.
    Unsubscribe {
        /// Topic name.
        topic: String,
    },
    /// Publish a payload to a topic.
    Publish {
        /// Topic name.
        topic: String,
        /// Message body.
        payload: String,
    },
    /// Acknowledge receipt up to `sequence`.
    Ack {
        /// Topic name.
        topic: String,
        /// Highest sequence received.
        sequence: u64,
    },
    /// Client liveness probe.
    Ping,
    /// Answer to a server ping.
    Pong,
}

/// Frames sent by the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundFrame {
    /// A published message.
    Message {
        /// Topic name.
        topic: String,
        /// Per-topic sequence.
        sequence: u64,
        /// Message body.
        payload: String,
        /// Publishing user.
        from: Option<String>,
        /// Publish timestamp.
        published_at: DateTime<Utc>,
    },
    /// Subscription confirmed; `sequence` is the node's current watermark.
    Subscribed {
        /// Topic name.
        topic: String,
        /// Current delivered sequence on this node.
        sequence: u64,
    },
    /// Unsubscription confirmed.
    Unsubscribed {
        /// Topic name.
        topic: String,
    },
    /// Publish receipt: the message is durable.
    Published {
        /// Topic name.
        topic: String,
        /// Assigned sequence.
        sequence: u64,
    },
    /// Server keepalive.
    Ping {
        /// Server timestamp (ms).
        timestamp: i64,
    },
    /// Answer to a client ping.
    Pong {
        /// Server timestamp (ms).
        timestamp: i64,
    },
    /// Request-level failure; the connection stays open.
    Error {
        /// Machine-readable code.
        code: String,
        /// Description.
        message: String,
    },
}

impl OutboundFrame {
    /// Build a `MESSAGE` frame from a delivered message.
    pub fn message(message: &Message) -> Self {
        Self::Message {
            topic: message.topic.clone(),
            sequence: message.sequence,
            payload: String::from_utf8_lossy(&message.payload).into_owned(),
            from: message.sender.clone(),
            published_at: message.published_at,
        }
    }

    /// Build an `ERROR` frame.
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }

    /// Build a `PING` frame stamped now.
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Build a `PONG` frame stamped now.
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Topic and sequence when this is a `MESSAGE` frame.
    pub fn topic_message(&self) -> Option<(&str, u64)> {
        match self {
            Self::Message {
                topic, sequence, ..
            } => Some((topic.as_str(), *sequence)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::serializer::{deserialize_inbound, serialize_outbound};
    use bytes::Bytes;
    use relay_core::types::NodeId;

    #[test]
    fn test_inbound_envelope_parsing() {
        assert_eq!(
            deserialize_inbound(r#"{"type":"SUBSCRIBE","topic":"room-1"}"#).unwrap(),
            InboundFrame::Subscribe {
                topic: "room-1".to_string(),
                sequence: None
            }
        );
        assert_eq!(
            deserialize_inbound(r#"{"type":"SUBSCRIBE","topic":"room-1","sequence":4}"#).unwrap(),
            InboundFrame::Subscribe {
                topic: "room-1".to_string(),
                sequence: Some(4)
            }
        );
        assert_eq!(
            deserialize_inbound(r#"{"type":"PING","topic":null,"payload":null}"#).unwrap(),
            InboundFrame::Ping
        );
        assert_eq!(
            deserialize_inbound(r#"{"type":"ACK","topic":"t","sequence":9}"#).unwrap(),
            InboundFrame::Ack {
                topic: "t".to_string(),
                sequence: 9
            }
        );
    }

    #[test]
    fn test_unknown_or_incomplete_frames_are_rejected() {
        assert!(deserialize_inbound(r#"{"type":"SHOUT","topic":"x"}"#).is_err());
        assert!(deserialize_inbound(r#"{"type":"PUBLISH","topic":"x"}"#).is_err());
        assert!(deserialize_inbound("not json").is_err());
    }

    #[test]
    fn test_message_frame_shape() {
        let message = Message {
            topic: "room-1".to_string(),
            sequence: 1,
            payload: Bytes::from_static(b"hello"),
            origin_node: NodeId::new("node-2"),
            sender: Some("bob".to_string()),
            published_at: Utc::now(),
        };
        let frame = OutboundFrame::message(&message);
        assert_eq!(frame.topic_message(), Some(("room-1", 1)));

        let json: serde_json::Value =
            serde_json::from_str(&serialize_outbound(&frame).unwrap()).unwrap();
        assert_eq!(json["type"], "MESSAGE");
        assert_eq!(json["topic"], "room-1");
        assert_eq!(json["sequence"], 1);
        assert_eq!(json["payload"], "hello");
        assert_eq!(json["from"], "bob");
    }
}
