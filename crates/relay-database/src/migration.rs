//! Embedded schema migrations for the outbox and membership tables.

use sqlx::PgPool;
use sqlx::migrate::Migrator;
use tracing::info;

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;

static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Apply any pending migrations.
pub async fn run_migrations(pool: &PgPool) -> AppResult<()> {
    info!(known = MIGRATOR.iter().count(), "Applying relay schema migrations");

    MIGRATOR.run(pool).await.map_err(|e| {
        AppError::with_source(
            ErrorKind::Database,
            format!("Failed to run migrations: {e}"),
            e,
        )
    })?;

    info!("Relay schema is up to date");
    Ok(())
}
