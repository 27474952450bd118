//! Cross-node broadcast bus trait.

use tokio::sync::broadcast;

use crate::result::AppResult;
use crate::types::bus::{BusEvent, BusMessage};

/// Shared fire-and-forget notification channel between nodes.
///
/// The channel gives no delivery guarantee; receivers compensate through
/// outbox reconciliation.
pub trait BroadcastBus: Send + Sync + std::fmt::Debug + 'static {
    /// Queue a message for every node. Must not block on network I/O.
    fn notify(&self, message: BusMessage) -> AppResult<()>;

    /// Receive messages from every node, including this one.
    fn subscribe(&self) -> broadcast::Receiver<BusEvent>;

    /// Whether the subscription to the shared channel is currently up.
    fn is_connected(&self) -> bool {
        true
    }
}
