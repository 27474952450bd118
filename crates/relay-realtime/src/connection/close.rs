//! WebSocket close codes and reasons.

use std::fmt;

/// Normal closure; used when a newer connection replaces a session.
pub const NORMAL: u16 = 1000;
/// Server is going away (shutdown or client-initiated close).
pub const GOING_AWAY: u16 = 1001;
/// Protocol error.
pub const PROTOCOL_ERROR: u16 = 1002;
/// Policy violation; used when the user identity is missing.
pub const POLICY_VIOLATION: u16 = 1008;
/// No heartbeat within the configured timeout.
pub const HEARTBEAT_TIMEOUT: u16 = 4001;
/// Outbound queue overflowed under the disconnect policy.
pub const SLOW_CONSUMER: u16 = 4002;

/// Largest close reason a WebSocket control frame can carry.
pub const MAX_REASON_BYTES: usize = 123;

/// Why a session was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason sent in the close frame.
    pub reason: String,
}

impl CloseReason {
    /// Create a close reason, truncated to [`MAX_REASON_BYTES`] on a char
    /// boundary.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.len() > MAX_REASON_BYTES {
            let mut end = MAX_REASON_BYTES;
            while !reason.is_char_boundary(end) {
                end -= 1;
            }
            reason.truncate(end);
        }
        Self { code, reason }
    }

    /// A newer connection for the same user took over.
    pub fn replaced() -> Self {
        Self::new(NORMAL, "replaced by a new connection")
    }

    /// The node is shutting down.
    pub fn shutdown() -> Self {
        Self::new(GOING_AWAY, "server shutting down")
    }

    /// The client closed or the transport failed.
    pub fn client_gone() -> Self {
        Self::new(GOING_AWAY, "client disconnected")
    }

    /// The client sent something that violates the frame protocol.
    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::new(PROTOCOL_ERROR, detail)
    }

    /// No `X-User-Id` was supplied.
    pub fn missing_identity() -> Self {
        Self::new(POLICY_VIOLATION, "missing user id")
    }

    /// The session stopped answering heartbeats.
    pub fn heartbeat_timeout() -> Self {
        Self::new(HEARTBEAT_TIMEOUT, "heartbeat timeout")
    }

    /// The session could not keep up with its outbound queue.
    pub fn slow_consumer() -> Self {
        Self::new(SLOW_CONSUMER, "slow consumer")
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}
