//! # relay-database
//!
//! PostgreSQL connection management, the durable outbox and node
//! membership repositories, and an in-memory outbox with the same
//! contract for single-node deployments and tests.

pub mod connection;
pub mod memory;
pub mod migration;
pub mod repositories;

pub use connection::DatabasePool;
pub use memory::MemoryOutboxStore;
pub use repositories::{MembershipRepository, OutboxRepository};
