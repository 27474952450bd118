//! Application configuration schemas.
//!
//! All configuration structs are deserialized from TOML files via the
//! `config` crate. Each sub-module represents a logical configuration
//! section.

pub mod app;
pub mod broadcast;
pub mod database;
pub mod logging;
pub mod node;
pub mod outbox;
pub mod realtime;

use serde::{Deserialize, Serialize};

pub use self::app::ServerConfig;
pub use self::broadcast::BroadcastConfig;
pub use self::database::DatabaseConfig;
pub use self::logging::{LogFormat, LoggingConfig};
pub use self::node::NodeConfig;
pub use self::outbox::{OutboxBackend, OutboxConfig};
pub use self::realtime::{OverflowPolicy, RealtimeConfig};

use crate::error::AppError;

/// Root application configuration.
///
/// This struct is the top-level deserialization target for the merged
/// TOML configuration files (default.toml + environment overlay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Node identity.
    #[serde(default)]
    pub node: NodeConfig,
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Session, queue and heartbeat settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,
    /// Cross-node broadcast bus settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    /// Durable outbox settings.
    #[serde(default)]
    pub outbox: OutboxConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from TOML files.
    ///
    /// Merges `config/default`, an environment-specific overlay
    /// (`config/{env}`), an optional explicit file, and environment
    /// variables prefixed with `RELAY__`.
    pub fn load(env: &str, explicit: Option<&str>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        let config: Self = config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.realtime.queue_capacity == 0 {
            return Err(AppError::configuration(
                "realtime.queue_capacity must be at least 1",
            ));
        }
        if self.realtime.heartbeat_interval_ms == 0 {
            return Err(AppError::configuration(
                "realtime.heartbeat_interval_ms must be positive",
            ));
        }
        if self.realtime.heartbeat_timeout_ms <= self.realtime.heartbeat_interval_ms {
            return Err(AppError::configuration(
                "realtime.heartbeat_timeout_ms must exceed heartbeat_interval_ms",
            ));
        }
        if self.broadcast.reconcile_interval_ms == 0 {
            return Err(AppError::configuration(
                "broadcast.reconcile_interval_ms must be positive",
            ));
        }
        if self.broadcast.reconnect_initial_backoff_ms == 0
            || self.broadcast.reconnect_max_backoff_ms < self.broadcast.reconnect_initial_backoff_ms
        {
            return Err(AppError::configuration(
                "broadcast reconnect backoff bounds are invalid",
            ));
        }
        if !broadcast::is_valid_channel_name(&self.broadcast.channel_name) {
            return Err(AppError::configuration(format!(
                "broadcast.channel_name '{}' is not a valid identifier",
                self.broadcast.channel_name
            )));
        }
        if self.outbox.replay_batch_size == 0 {
            return Err(AppError::configuration(
                "outbox.replay_batch_size must be at least 1",
            ));
        }
        if self.outbox.backend == OutboxBackend::Postgres && self.database.url.is_empty() {
            return Err(AppError::configuration(
                "database.url is required for the postgres outbox backend",
            ));
        }
        Ok(())
    }
}
