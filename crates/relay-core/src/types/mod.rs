//! Shared types used across all relay crates.

pub mod bus;
pub mod id;
pub mod membership;
pub mod message;

pub use bus::{BusEvent, BusMessage};
pub use id::{NodeId, SessionId};
pub use membership::{NodeMembership, TopicWatermark};
pub use message::{Message, NewMessage, OutboxRecord};
