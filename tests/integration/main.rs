//! Multi-node integration tests.
//!
//! Nodes run in one process and share an in-memory outbox and bus.

mod helpers;

mod backpressure_test;
mod fanout_test;
mod presence_test;
mod reconcile_test;
mod ws_test;
