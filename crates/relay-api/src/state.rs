//! Application state shared across all handlers.

use std::sync::Arc;

use relay_core::config::AppConfig;
use relay_realtime::RelayNode;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// The relay node hosting this process's sessions
    pub node: Arc<RelayNode>,
}

impl AppState {
    /// Build state around a node.
    pub fn new(config: Arc<AppConfig>, node: Arc<RelayNode>) -> Self {
        Self { config, node }
    }
}
