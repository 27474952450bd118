//! JSON serialization for WebSocket frames.

use super::types::{InboundFrame, OutboundFrame};

/// Serialize an outbound frame to JSON text.
pub fn serialize_outbound(frame: &OutboundFrame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Deserialize an inbound frame from JSON text.
pub fn deserialize_inbound(text: &str) -> Result<InboundFrame, serde_json::Error> {
    serde_json::from_str(text)
}
