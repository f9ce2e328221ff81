use crate::domain::error::{AppError, Result};
use crate::domain::ingest_report::IngestRun;

use super::WarehouseRepository;

impl WarehouseRepository {
    pub(super) async fn insert_run(&self, run: &IngestRun) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_runs
            (run_id, file_name, checksum, source_system, data_kind, record_date,
             rows_read, accepted, rejected, skipped, warnings, status, error, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (run_id) DO UPDATE SET
                rows_read = EXCLUDED.rows_read,
                accepted = EXCLUDED.accepted,
                rejected = EXCLUDED.rejected,
                skipped = EXCLUDED.skipped,
                warnings = EXCLUDED.warnings,
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                finished_at = EXCLUDED.finished_at
            "#,
        )
        .bind(run.run_id)
        .bind(&run.file_name)
        .bind(run.checksum.as_deref())
        .bind(run.source_system.map(|s| s.as_str()))
        .bind(run.data_kind.map(|k| k.as_str()))
        .bind(run.record_date)
        .bind(run.rows_read)
        .bind(run.accepted)
        .bind(run.rejected)
        .bind(run.skipped)
        .bind(run.warnings)
        .bind(run.status.as_str())
        .bind(run.error.as_deref())
        .bind(run.started_at)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to record ingest run: {}", e)))?;

        Ok(())
    }
}
