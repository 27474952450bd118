//! Publish path, ordered local fan-out, and outbox catch-up.

pub mod dispatcher;
pub mod health;
