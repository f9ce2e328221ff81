use sqlx::{Postgres, QueryBuilder};
use tracing::info;

use crate::domain::contract_note::ContractNoteBatch;
use crate::domain::error::{AppError, Result};
use crate::domain::table_routing::checked_identifier;

use super::{rows_per_insert, WarehouseRepository};

pub(super) const NOTE_COLUMNS: &str = "source_system, record_date, ecn_number, trade_date, trade_side, \
     client_reference, client_name, instrument_isin, instrument_name, quantity, price, \
     gross_amount, net_amount, broker_code, amount_mismatch, file_name";

impl WarehouseRepository {
    pub(super) async fn write_contract_notes(&self, batch: &ContractNoteBatch) -> Result<u64> {
        let table = checked_identifier(&batch.table)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to begin transaction: {}", e)))?;

        sqlx::query(&format!(
            "DELETE FROM {} WHERE source_system = $1 AND record_date = $2",
            table
        ))
        .bind(batch.source_system.as_str())
        .bind(batch.record_date)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(format!("Failed to clear contract notes: {}", e)))?;

        let mut written = 0u64;
        for chunk in batch.notes.chunks(rows_per_insert(self.batch_size, NOTE_COLUMNS)) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO {} ({}) ", table, NOTE_COLUMNS));
            qb.push_values(chunk, |mut row, n| {
                row.push_bind(n.source_system.as_str())
                    .push_bind(n.record_date)
                    .push_bind(&n.ecn_number)
                    .push_bind(n.trade_date)
                    .push_bind(n.trade_side.as_str())
                    .push_bind(&n.client_reference)
                    .push_bind(n.client_name.as_deref())
                    .push_bind(&n.instrument_isin)
                    .push_bind(n.instrument_name.as_deref())
                    .push_bind(&n.quantity)
                    .push_bind(n.price.as_ref())
                    .push_bind(n.gross_amount.as_ref())
                    .push_bind(n.net_amount.as_ref())
                    .push_bind(n.broker_code.as_deref())
                    .push_bind(n.amount_mismatch)
                    .push_bind(&n.file_name);
            });
            qb.push(
                " ON CONFLICT (source_system, record_date, ecn_number, client_reference, instrument_isin, trade_side) \
                 DO UPDATE SET trade_date = EXCLUDED.trade_date, client_name = EXCLUDED.client_name, \
                 instrument_name = EXCLUDED.instrument_name, quantity = EXCLUDED.quantity, \
                 price = EXCLUDED.price, gross_amount = EXCLUDED.gross_amount, \
                 net_amount = EXCLUDED.net_amount, broker_code = EXCLUDED.broker_code, \
                 amount_mismatch = EXCLUDED.amount_mismatch, file_name = EXCLUDED.file_name, \
                 loaded_at = NOW()",
            );

            let res = qb.build().execute(&mut *tx).await.map_err(|e| {
                AppError::DatabaseError(format!("Failed to insert contract notes: {}", e))
            })?;
            written += res.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to commit contract notes: {}", e)))?;

        info!(
            source = %batch.source_system,
            record_date = %batch.record_date,
            file = %batch.file_name,
            table = table,
            rows = written,
            "Contract notes replaced"
        );
        Ok(written)
    }
}
