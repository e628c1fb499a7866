//! Database setup and store construction

use crate::{CoordinationStore, MemoryCoordinationStore, PgCoordinationStore};
use anyhow::{Context, Result};
use mediagate_core::{Config, CoordinationBackend};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Setup database connection pool and run migrations
pub async fn setup_database(database_url: &str, config: &Config) -> Result<PgPool> {
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to database")?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Database connected successfully"
    );

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    Ok(pool)
}

/// Build the configured coordination store
pub async fn create_coordination_store(config: &Config) -> Result<Arc<dyn CoordinationStore>> {
    match config.coordination_backend {
        CoordinationBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL not configured")?;
            let pool = setup_database(database_url, config).await?;
            Ok(Arc::new(PgCoordinationStore::new(pool)))
        }
        CoordinationBackend::Memory => {
            tracing::warn!("Using in-memory coordination store; state is lost on restart");
            Ok(Arc::new(MemoryCoordinationStore::new()))
        }
    }
}
