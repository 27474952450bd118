//! Relay server: realtime message fan-out node.
//!
//! Main entry point that wires all crates together and starts the server.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt};

use relay_api::AppState;
use relay_api::app::{run_server, shutdown_signal};
use relay_core::config::{AppConfig, LogFormat, OutboxBackend};
use relay_core::error::{AppError, ErrorKind};
use relay_database::{DatabasePool, MembershipRepository, MemoryOutboxStore, OutboxRepository};
use relay_realtime::bridge::{MemoryBus, PgNotifyBus};
use relay_realtime::{NodeBackends, RelayNode};

/// Capacity of the in-process bus used by the memory backend.
const MEMORY_BUS_CAPACITY: usize = 1024;

/// Relay: distributed realtime message fan-out
#[derive(Debug, Parser)]
#[command(name = "relay-server", version, about, long_about = None)]
struct Cli {
    /// Extra configuration file merged over config/default and config/{env}
    #[arg(short, long)]
    config: Option<String>,

    /// Environment overlay to load from config/{env}
    #[arg(short, long, env = "RELAY_ENV", default_value = "development")]
    env: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.env, cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        LogFormat::Pretty => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Main server run function
async fn run(config: AppConfig) -> Result<(), AppError> {
    let node_id = config.node.resolve_id();
    tracing::info!(
        node_id = %node_id,
        backend = ?config.outbox.backend,
        "Starting relay v{}",
        env!("CARGO_PKG_VERSION")
    );

    // ── Step 1: Storage and bus backends ─────────────────────────
    let (backends, pg_bus, db_pool) = match config.outbox.backend {
        OutboxBackend::Postgres => {
            let db_pool = DatabasePool::connect(&config.database).await?;
            relay_database::migration::run_migrations(db_pool.pool()).await?;

            let bus = Arc::new(PgNotifyBus::new(db_pool.pool().clone(), &config.broadcast));
            let backends = NodeBackends {
                store: Arc::new(OutboxRepository::new(db_pool.pool().clone())),
                membership: Arc::new(MembershipRepository::new(db_pool.pool().clone())),
                bus: bus.clone(),
            };
            (backends, Some(bus), Some(db_pool))
        }
        OutboxBackend::Memory => {
            tracing::warn!("Using the in-memory outbox; messages do not survive a restart");
            let backends = NodeBackends::memory(
                Arc::new(MemoryOutboxStore::new()),
                Arc::new(MemoryBus::new(MEMORY_BUS_CAPACITY)),
            );
            (backends, None, None)
        }
    };

    // ── Step 2: Relay node ───────────────────────────────────────
    let node = Arc::new(RelayNode::new(&config, node_id, backends));

    let bus_tasks: Vec<JoinHandle<()>> = match &pg_bus {
        Some(bus) => bus.start(node.cancel_token().child_token())?,
        None => Vec::new(),
    };
    node.start();

    // ── Step 3: HTTP server ──────────────────────────────────────
    let addr = config.server.bind_address();
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        AppError::with_source(ErrorKind::Internal, format!("Failed to bind {addr}: {e}"), e)
    })?;

    let state = AppState::new(Arc::new(config), node.clone());
    let served = run_server(state, listener, shutdown_signal()).await;

    // ── Step 4: Graceful shutdown ────────────────────────────────
    if served.is_err() {
        node.shutdown().await;
    }
    for task in bus_tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Broadcast bus task ended abnormally");
        }
    }
    if let Some(db_pool) = db_pool {
        db_pool.close().await;
    }

    served
}
