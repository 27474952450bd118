//! # relay-realtime
//!
//! Realtime fan-out engine. Provides:
//!
//! - Session registry with per-topic subscriber indices
//! - Bounded per-session outbound queues drained by writer loops
//! - Fan-out dispatcher with durable outbox writes and ordered local delivery
//! - Cross-node broadcast bus (PostgreSQL LISTEN/NOTIFY or in-memory)
//! - Watermark reconciliation, retention and partition detection
//! - Heartbeat-based presence monitoring

pub mod bridge;
pub mod channel;
pub mod connection;
pub mod dispatch;
pub mod message;
pub mod metrics;
pub mod presence;
pub mod server;

pub use channel::registry::SessionRegistry;
pub use connection::manager::ConnectionManager;
pub use dispatch::dispatcher::FanoutDispatcher;
pub use presence::monitor::PresenceMonitor;
pub use server::{NodeBackends, NodeStatus, RelayNode};
