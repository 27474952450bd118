//! Cross-node broadcast: bus backends, notification listener,
//! reconciliation and retention.

pub mod backoff;
pub mod listener;
pub mod memory_bus;
pub mod peers;
pub mod pg_notify;
pub mod reconcile;

pub use memory_bus::MemoryBus;
pub use pg_notify::PgNotifyBus;
