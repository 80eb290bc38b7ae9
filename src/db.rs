//! Connection pool bootstrap and schema migrations.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Open a connection pool, retrying the initial connection attempt with a
/// fixed backoff. Postgres is frequently still starting up when this
/// service's container does (docker-compose, k8s sidecars), so a single
/// failed attempt at boot is expected, not fatal.
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    let dsn = config.dsn();
    let mut attempt = 1u32;

    loop {
        tracing::info!(attempt, max_attempts = config.max_conn_attempts, "connecting to postgres");

        match PgPoolOptions::new().max_connections(10).connect(&dsn).await {
            Ok(pool) => {
                tracing::info!("connected to postgres");
                return Ok(pool);
            }
            Err(err) if attempt < config.max_conn_attempts => {
                tracing::warn!(attempt, error = %err, "postgres connection attempt failed, retrying");
                tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                attempt += 1;
            }
            Err(err) => {
                return Err(err).context("exhausted postgres connection attempts");
            }
        }
    }
}

/// Apply pending schema migrations. Safe to call on every startup.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("failed to run database migrations")
}
