use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::info;

use crate::domain::custody_record::{CustodySnapshot, UnifiedCustodyRecord};
use crate::domain::error::{AppError, Result};
use crate::domain::table_routing::{checked_identifier, CUSTODY_MASTER_TABLE};

use super::{rows_per_insert, WarehouseRepository};

pub(super) const CUSTODY_COLUMNS: &str = "source_system, record_date, client_reference, client_name, \
     instrument_isin, instrument_name, instrument_code, blocked_quantity, pending_buy_quantity, \
     pending_sell_quantity, total_position, saleable_quantity, saleable_derived, \
     balance_mismatch, file_name";

const CUSTODY_UPSERT: &str = " ON CONFLICT (source_system, record_date, client_reference, instrument_isin) DO UPDATE SET \
     client_name = EXCLUDED.client_name, \
     instrument_name = EXCLUDED.instrument_name, \
     instrument_code = EXCLUDED.instrument_code, \
     blocked_quantity = EXCLUDED.blocked_quantity, \
     pending_buy_quantity = EXCLUDED.pending_buy_quantity, \
     pending_sell_quantity = EXCLUDED.pending_sell_quantity, \
     total_position = EXCLUDED.total_position, \
     saleable_quantity = EXCLUDED.saleable_quantity, \
     saleable_derived = EXCLUDED.saleable_derived, \
     balance_mismatch = EXCLUDED.balance_mismatch, \
     file_name = EXCLUDED.file_name, \
     loaded_at = NOW()";

impl WarehouseRepository {
    /// Replace the (source, date) snapshot in the master and the shadow table inside
    /// one transaction. Returns rows written to the master.
    pub(super) async fn write_custody_snapshot(&self, snapshot: &CustodySnapshot) -> Result<u64> {
        let master = checked_identifier(&snapshot.master_table)?;
        let shadow = checked_identifier(&snapshot.shadow_table)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        // Two sources of the same day create the same shadow table concurrently.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(shadow)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to lock {}: {}", shadow, e)))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (LIKE {} INCLUDING ALL)",
            shadow, CUSTODY_MASTER_TABLE
        ))
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to create {}: {}", shadow, e)))?;

        for table in [master, shadow] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE source_system = $1 AND record_date = $2",
                table
            ))
            .bind(snapshot.source_system.as_str())
            .bind(snapshot.record_date)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(format!("Failed to clear snapshot in {}: {}", table, e))
            })?;
        }

        let written = insert_custody_rows(&mut tx, master, &snapshot.records, self.batch_size).await?;
        insert_custody_rows(&mut tx, shadow, &snapshot.records, self.batch_size).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit snapshot: {}", e)))?;

        info!(
            source = %snapshot.source_system,
            record_date = %snapshot.record_date,
            file = %snapshot.file_name,
            master = master,
            shadow = shadow,
            rows = written,
            "Custody snapshot replaced"
        );
        Ok(written)
    }
}

async fn insert_custody_rows(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    records: &[UnifiedCustodyRecord],
    batch_size: usize,
) -> Result<u64> {
    let mut written = 0u64;
    for chunk in records.chunks(rows_per_insert(batch_size, CUSTODY_COLUMNS)) {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, CUSTODY_COLUMNS));
        qb.push_values(chunk, |mut row, r| {
            row.push_bind(r.source_system.as_str())
                .push_bind(r.record_date)
                .push_bind(&r.client_reference)
                .push_bind(r.client_name.as_deref())
                .push_bind(&r.instrument_isin)
                .push_bind(r.instrument_name.as_deref())
                .push_bind(r.instrument_code.as_deref())
                .push_bind(r.blocked_quantity.as_ref())
                .push_bind(r.pending_buy_quantity.as_ref())
                .push_bind(r.pending_sell_quantity.as_ref())
                .push_bind(r.total_position.as_ref())
                .push_bind(r.saleable_quantity.as_ref())
                .push_bind(r.saleable_derived)
                .push_bind(r.balance_mismatch)
                .push_bind(&r.file_name);
        });
        qb.push(CUSTODY_UPSERT);

        let res = qb
            .build()
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to insert into {}: {}", table, e)))?;
        written += res.rows_affected();
    }
    Ok(written)
}
