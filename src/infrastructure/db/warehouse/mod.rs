mod contract_notes;
mod custody;
mod maintenance;
mod runs;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::domain::contract_note::ContractNoteBatch;
use crate::domain::custody_record::CustodySnapshot;
use crate::domain::error::{AppError, Result};
use crate::domain::ingest_report::{ClearScope, IngestRun, WarehouseStats};
use crate::infrastructure::config::WarehouseConfig;
use crate::infrastructure::db::{split_sql_statements, WarehouseStore};

const WAREHOUSE_SCHEMA: &str = include_str!("../../../../resources/warehouse/schema.sql");

/// Postgres caps one statement at 65535 bind parameters.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Rows per multi-row INSERT, capped so every row's binds fit in one statement.
fn rows_per_insert(batch_size: usize, column_list: &str) -> usize {
    let columns = column_list.split(',').count();
    batch_size.clamp(1, MAX_BIND_PARAMS / columns)
}

pub struct WarehouseRepository {
    pool: PgPool,
    batch_size: usize,
}

impl WarehouseRepository {
    pub fn new(pool: PgPool, batch_size: usize) -> Self {
        Self {
            pool,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn connect(config: &WarehouseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.database_url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect warehouse: {}", e)))?;

        Ok(Self::new(pool, config.insert_batch_size))
    }

    /// Defers connecting to the first query, for commands that may never reach the
    /// warehouse.
    pub fn connect_lazy(config: &WarehouseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect_lazy(&config.database_url)
            .map_err(|e| AppError::DatabaseError(format!("Invalid warehouse URL: {}", e)))?;

        Ok(Self::new(pool, config.insert_batch_size))
    }

    /// Create master tables and indexes if missing.
    pub async fn init_schema(&self) -> Result<()> {
        for stmt in split_sql_statements(WAREHOUSE_SCHEMA) {
            sqlx::query(&stmt).execute(&self.pool).await.map_err(|e| {
                AppError::DatabaseError(format!("Failed to apply warehouse schema: {}", e))
            })?;
        }
        info!("Warehouse schema ready");
        Ok(())
    }
}

#[async_trait]
impl WarehouseStore for WarehouseRepository {
    async fn replace_custody_snapshot(&self, snapshot: &CustodySnapshot) -> Result<u64> {
        self.write_custody_snapshot(snapshot).await
    }

    async fn replace_contract_notes(&self, batch: &ContractNoteBatch) -> Result<u64> {
        self.write_contract_notes(batch).await
    }

    async fn record_run(&self, run: &IngestRun) -> Result<()> {
        self.insert_run(run).await
    }

    async fn stats(&self) -> Result<WarehouseStats> {
        self.collect_stats().await
    }

    async fn clear(&self, scope: &ClearScope) -> Result<u64> {
        self.clear_scope(scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_per_insert_respects_bind_limit() {
        assert_eq!(rows_per_insert(500, custody::CUSTODY_COLUMNS), 500);
        assert_eq!(rows_per_insert(0, custody::CUSTODY_COLUMNS), 1);

        let custody_rows = rows_per_insert(100_000, custody::CUSTODY_COLUMNS);
        assert_eq!(custody_rows, 4369);
        assert!(custody_rows * 15 <= MAX_BIND_PARAMS);

        let note_rows = rows_per_insert(100_000, contract_notes::NOTE_COLUMNS);
        assert_eq!(note_rows, 4095);
        assert!(note_rows * 16 <= MAX_BIND_PARAMS);
    }
}
