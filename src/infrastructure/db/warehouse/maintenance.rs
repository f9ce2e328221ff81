use chrono::NaiveDate;
use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::domain::error::{AppError, Result};
use crate::domain::ingest_report::{ClearScope, SnapshotCount, WarehouseStats};
use crate::domain::table_routing::{
    checked_identifier, shadow_table_date, CONTRACT_NOTES_TABLE, CUSTODY_MASTER_TABLE,
    INGEST_RUNS_TABLE,
};

use super::WarehouseRepository;

impl WarehouseRepository {
    pub(super) async fn collect_stats(&self) -> Result<WarehouseStats> {
        let custody_rows = self.count_rows(CUSTODY_MASTER_TABLE).await?;
        let contract_note_rows = self.count_rows(CONTRACT_NOTES_TABLE).await?;
        let runs = self.count_rows(INGEST_RUNS_TABLE).await?;

        let sql = format!(
            "SELECT '{custody}'::text, source_system, record_date, COUNT(*)::bigint FROM {custody} GROUP BY source_system, record_date
             UNION ALL
             SELECT '{notes}'::text, source_system, record_date, COUNT(*)::bigint FROM {notes} GROUP BY source_system, record_date
             ORDER BY 3 DESC, 1, 2",
            custody = CUSTODY_MASTER_TABLE,
            notes = CONTRACT_NOTES_TABLE
        );
        let rows: Vec<(String, String, NaiveDate, i64)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to read snapshot counts: {}", e)))?;

        Ok(WarehouseStats {
            custody_rows,
            contract_note_rows,
            runs,
            snapshots: rows
                .into_iter()
                .map(|(table, source_system, record_date, rows)| SnapshotCount {
                    table,
                    source_system,
                    record_date,
                    rows,
                })
                .collect(),
        })
    }

    async fn count_rows(&self, table: &str) -> Result<i64> {
        sqlx::query_scalar(&format!("SELECT COUNT(*)::bigint FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to count {}: {}", table, e)))
    }

    async fn shadow_tables(&self) -> Result<Vec<(String, NaiveDate)>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT table_name::text FROM information_schema.tables
             WHERE table_schema = current_schema() AND table_name LIKE 'custody\\_snapshot\\_%'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to list shadow tables: {}", e)))?;

        Ok(names
            .into_iter()
            .filter_map(|name| shadow_table_date(&name).map(|date| (name, date)))
            .collect())
    }

    /// Delete master rows in scope. Shadow tables wholly in scope are dropped, the
    /// others lose the matching rows. The run ledger is kept.
    pub(super) async fn clear_scope(&self, scope: &ClearScope) -> Result<u64> {
        let shadows: Vec<(String, NaiveDate)> = self
            .shadow_tables()
            .await?
            .into_iter()
            .filter(|(_, date)| scope.record_date.map_or(true, |d| d == *date))
            .collect();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        let mut deleted = 0u64;
        for table in [CUSTODY_MASTER_TABLE, CONTRACT_NOTES_TABLE] {
            let res = scoped_delete(table, scope)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to clear {}: {}", table, e)))?;
            deleted += res.rows_affected();
        }

        for (table, _) in &shadows {
            let table = checked_identifier(table)?;
            if scope.source_system.is_none() {
                sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| AppError::DatabaseError(format!("Failed to drop {}: {}", table, e)))?;
            } else {
                scoped_delete(table, scope)
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| AppError::DatabaseError(format!("Failed to clear {}: {}", table, e)))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit clear: {}", e)))?;

        info!(
            source = ?scope.source_system,
            record_date = ?scope.record_date,
            rows = deleted,
            shadow_tables = shadows.len(),
            "Warehouse cleared"
        );
        Ok(deleted)
    }
}

fn scoped_delete<'a>(table: &str, scope: &'a ClearScope) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {} WHERE TRUE", table));
    if let Some(source) = scope.source_system {
        qb.push(" AND source_system = ").push_bind(source.as_str());
    }
    if let Some(date) = scope.record_date {
        qb.push(" AND record_date = ").push_bind(date);
    }
    qb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::custodian::SourceSystem;

    #[test]
    fn test_scoped_delete_sql() {
        let everything = ClearScope::default();
        assert_eq!(
            scoped_delete(CUSTODY_MASTER_TABLE, &everything).sql(),
            "DELETE FROM unified_custody_master WHERE TRUE"
        );

        let scope = ClearScope {
            source_system: Some(SourceSystem::Axis),
            record_date: NaiveDate::from_ymd_opt(2024, 6, 30),
        };
        let qb = scoped_delete(CONTRACT_NOTES_TABLE, &scope);
        assert_eq!(
            qb.sql(),
            "DELETE FROM contract_notes_master WHERE TRUE AND source_system = $1 AND record_date = $2"
        );
    }
}
