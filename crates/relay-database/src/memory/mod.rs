//! In-process outbox for single-node deployments and tests.

pub mod store;

pub use store::MemoryOutboxStore;
