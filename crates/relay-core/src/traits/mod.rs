//! Core traits defined in `relay-core` and implemented by other crates.

pub mod bus;
pub mod outbox;

pub use bus::BroadcastBus;
pub use outbox::{MembershipStore, OutboxStore};
