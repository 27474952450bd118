//! Session lifecycle: handles, bounded outbound queues, writer loops,
//! and inbound frame routing.

pub mod close;
pub mod handle;
pub mod manager;
pub mod queue;
pub mod writer;
