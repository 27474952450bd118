//! In-process broadcast bus for single-node deployments and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::broadcast;

use relay_core::result::AppResult;
use relay_core::traits::BroadcastBus;
use relay_core::types::{BusEvent, BusMessage};

/// Broadcast bus backed by a tokio broadcast channel.
///
/// Nodes sharing one instance behave like nodes sharing a LISTEN/NOTIFY
/// channel. Publish notifications can be discarded on purpose to
/// exercise reconciliation.
#[derive(Debug)]
pub struct MemoryBus {
    events: broadcast::Sender<BusEvent>,
    dropping: AtomicBool,
    dropped: AtomicU64,
}

impl MemoryBus {
    /// Create a bus buffering `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            events,
            dropping: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Discard (`true`) or carry (`false`) publish notifications.
    pub fn set_dropping(&self, dropping: bool) {
        self.dropping.store(dropping, Ordering::SeqCst);
    }

    /// Publish notifications discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Tell subscribers the channel was re-established.
    pub fn announce_reconnect(&self) {
        let _ = self.events.send(BusEvent::Reconnected);
    }
}

impl BroadcastBus for MemoryBus {
    fn notify(&self, message: BusMessage) -> AppResult<()> {
        if self.dropping.load(Ordering::SeqCst) && matches!(message, BusMessage::Published { .. })
        {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        // No receivers is not an error: nobody is listening yet.
        let _ = self.events.send(BusEvent::Message(message));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }
}
