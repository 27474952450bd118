//! Messages carried on the cross-node broadcast bus.

use serde::{Deserialize, Serialize};

use super::id::NodeId;

/// Payload of a bus notification. Kept small: receivers read the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BusMessage {
    /// A message was appended to the outbox.
    Published {
        /// Topic name.
        topic: String,
        /// Sequence assigned to the message.
        sequence: u64,
        /// Node that accepted the publish.
        origin_node: NodeId,
    },
    /// Periodic liveness beacon.
    Heartbeat {
        /// Sending node.
        origin_node: NodeId,
    },
}

impl BusMessage {
    /// Node that emitted this message.
    pub fn origin_node(&self) -> &NodeId {
        match self {
            Self::Published { origin_node, .. } | Self::Heartbeat { origin_node } => origin_node,
        }
    }
}

/// Events surfaced to bus subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// A message arrived from the channel.
    Message(BusMessage),
    /// The underlying subscription was re-established; notifications may have been missed.
    Reconnected,
}
