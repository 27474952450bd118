//! Heartbeat-based session liveness and idle topic collection.

pub mod monitor;
