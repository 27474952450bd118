//! # relay-api
//!
//! HTTP layer for the relay built on Axum.
//!
//! Exposes the WebSocket upgrade endpoint, extracts the caller identity
//! forwarded by the proxy, runs the per-connection reader and writer
//! tasks, and maps pre-upgrade failures to HTTP responses.

pub mod app;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod router;
pub mod state;

pub use app::{build_app, run_server};
pub use error::ApiError;
pub use state::AppState;
