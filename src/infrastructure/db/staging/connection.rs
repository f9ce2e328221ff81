use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::domain::error::{AppError, Result};
use crate::infrastructure::db::split_sql_statements;

const STAGING_SCHEMA: &str = include_str!("../../../../resources/staging/schema.sql");

pub async fn connect_staging_pool(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let in_memory = database_url.contains(":memory:");

    let mut options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::DatabaseError(format!("Failed to parse staging DB URL: {}", e)))?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    // Every connection to :memory: opens its own database, so keep exactly one alive.
    let pool_options = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(max_connections)
    };

    pool_options
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to connect staging DB: {}", e)))
}

/// Create the staging tables if missing.
pub async fn init_staging_db(pool: &SqlitePool) -> Result<()> {
    for stmt in split_sql_statements(STAGING_SCHEMA) {
        sqlx::query(&stmt)
            .execute(pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to apply staging schema statement: {}", e))
            })?;
    }

    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Staging database health check failed: {}", e)))?;

    info!("Staging schema ready");
    Ok(())
}
