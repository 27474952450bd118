//! Node membership and delivery watermarks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::NodeId;

/// Ephemeral identity of a live node, refreshed every reconciliation pass.
///
/// Used to notice broadcast-bus partitions; never used to route clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMembership {
    /// Node id.
    pub node_id: NodeId,
    /// Broadcast channel the node listens on.
    pub channel_name: String,
    /// Last time the node reported in.
    pub last_seen: DateTime<Utc>,
}

/// Highest sequence a node has delivered locally for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicWatermark {
    /// Topic name.
    pub topic: String,
    /// Last delivered sequence.
    pub sequence: u64,
}
