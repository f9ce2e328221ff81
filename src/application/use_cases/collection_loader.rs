use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{info, warn};

use crate::application::use_cases::custodian_profiles::{profile_for, resolve, ResolvedMapping};
use crate::application::use_cases::record_normalizer::{
    extract_contract_note, extract_custody, RowContext,
};
use crate::application::use_cases::record_validation::{
    validate_contract_note, validate_custody, RowOutcome, ValidationOptions,
};
use crate::domain::contract_note::{ContractNote, ContractNoteBatch};
use crate::domain::custodian::DataKind;
use crate::domain::custody_record::{CustodySnapshot, UnifiedCustodyRecord};
use crate::domain::error::{AppError, Result};
use crate::domain::ingest_report::LoadReport;
use crate::domain::sheet::{is_blank_row, RawSheet};
use crate::domain::staging::StagedCollection;
use crate::domain::table_routing::route;
use crate::infrastructure::db::WarehouseStore;

/// Normalizes, validates and routes one staged collection into the warehouse.
pub struct CollectionLoader {
    warehouse: Arc<dyn WarehouseStore>,
    options: ValidationOptions,
}

impl CollectionLoader {
    pub fn new(warehouse: Arc<dyn WarehouseStore>, options: ValidationOptions) -> Self {
        Self { warehouse, options }
    }

    pub async fn load(&self, collection: &StagedCollection, sheet: &RawSheet) -> Result<LoadReport> {
        let kind = collection.data_kind();
        let profile = profile_for(collection.source_system(), kind);
        let mapping = resolve(profile, &sheet.headers);
        mapping.ensure_required(kind).map_err(|e| match e {
            AppError::ValidationError(msg) => {
                AppError::ValidationError(format!("{}: {}", collection.name, msg))
            }
            other => other,
        })?;

        let ctx = RowContext {
            source_system: collection.source_system(),
            file_name: &collection.file_name,
            record_date: collection.record_date(),
        };
        let tables = route(kind, collection.record_date());

        let mut report = match kind {
            DataKind::Custody => {
                let (records, mut report) = normalize_custody(sheet, &mapping, &ctx, &self.options);
                let shadow = tables.shadow.clone().unwrap_or_default();
                let snapshot = CustodySnapshot {
                    source_system: ctx.source_system,
                    record_date: ctx.record_date,
                    file_name: collection.file_name.clone(),
                    master_table: tables.master.clone(),
                    shadow_table: shadow.clone(),
                    records,
                };
                report.written = self.warehouse.replace_custody_snapshot(&snapshot).await?;
                report.target_tables = vec![tables.master.clone(), shadow];
                report
            }
            DataKind::Transactions => {
                let (notes, mut report) =
                    normalize_contract_notes(sheet, &mapping, &ctx, &self.options);
                let batch = ContractNoteBatch {
                    source_system: ctx.source_system,
                    record_date: ctx.record_date,
                    file_name: collection.file_name.clone(),
                    table: tables.master.clone(),
                    notes,
                };
                report.written = self.warehouse.replace_contract_notes(&batch).await?;
                report.target_tables = vec![tables.master.clone()];
                report
            }
        };
        report.target_tables.retain(|t| !t.is_empty());

        if report.rejected > 0 {
            warn!(
                collection = %collection.name,
                rejected = report.rejected,
                "Rows rejected during load"
            );
        }
        info!(
            collection = %collection.name,
            read = report.rows_read,
            accepted = report.accepted,
            rejected = report.rejected,
            skipped = report.skipped,
            written = report.written,
            "Collection loaded"
        );
        Ok(report)
    }
}

/// Keeps the first occurrence's position and merges later duplicates into it.
struct Deduplicator<K, T> {
    positions: HashMap<K, (usize, usize)>,
    items: Vec<T>,
}

impl<K: Eq + Hash, T> Deduplicator<K, T> {
    fn new() -> Self {
        Self {
            positions: HashMap::new(),
            items: Vec::new(),
        }
    }

    /// Returns the row number of the earlier occurrence when `item` was merged.
    fn push(&mut self, key: K, row_number: usize, item: T, merge: impl FnOnce(&mut T, &T)) -> Option<usize> {
        match self.positions.get(&key) {
            Some(&(pos, first_row)) => {
                merge(&mut self.items[pos], &item);
                Some(first_row)
            }
            None => {
                self.positions.insert(key, (self.items.len(), row_number));
                self.items.push(item);
                None
            }
        }
    }
}

fn tally<T, K: Eq + Hash>(
    sheet: &RawSheet,
    mut handle: impl FnMut(&[String]) -> RowOutcome<T>,
    key_of: impl Fn(&T) -> K,
    merge: impl Fn(&mut T, &T),
) -> (Vec<T>, LoadReport) {
    let mut report = LoadReport {
        rows_read: sheet.len(),
        ..Default::default()
    };
    let mut dedup = Deduplicator::new();

    for (idx, row) in sheet.rows.iter().enumerate() {
        let row_number = idx + 1;
        if is_blank_row(row) {
            report.skipped += 1;
            continue;
        }
        match handle(row) {
            RowOutcome::Rejected(reasons) => report.reject(row_number, &reasons),
            RowOutcome::Accepted { record, warnings } => {
                report.accepted += 1;
                for message in &warnings {
                    report.warn(row_number, message);
                }
                let key = key_of(&record);
                if let Some(first_row) = dedup.push(key, row_number, record, &merge) {
                    report.merged_duplicates += 1;
                    report.warn(row_number, &format!("duplicate of row {} merged", first_row));
                }
            }
        }
    }

    (dedup.items, report)
}

pub fn normalize_custody(
    sheet: &RawSheet,
    mapping: &ResolvedMapping,
    ctx: &RowContext<'_>,
    options: &ValidationOptions,
) -> (Vec<UnifiedCustodyRecord>, LoadReport) {
    tally(
        sheet,
        |row| validate_custody(extract_custody(row, mapping), ctx, options),
        UnifiedCustodyRecord::snapshot_key,
        UnifiedCustodyRecord::absorb,
    )
}

pub fn normalize_contract_notes(
    sheet: &RawSheet,
    mapping: &ResolvedMapping,
    ctx: &RowContext<'_>,
    options: &ValidationOptions,
) -> (Vec<ContractNote>, LoadReport) {
    tally(
        sheet,
        |row| validate_contract_note(extract_contract_note(row, mapping), ctx, options),
        ContractNote::upsert_key,
        ContractNote::absorb,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::custodian::SourceSystem;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn sheet(headers: &[&str], rows: &[&[&str]]) -> RawSheet {
        RawSheet {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
            header_row: 0,
        }
    }

    #[test]
    fn test_normalize_custody_counts_and_merges() {
        let data = sheet(
            &["Client Code", "ISIN", "Pledged Qty", "Free Balance", "Total Balance"],
            &[
                &["C1", "INE002A01018", "10", "90", "100"],
                &["", "", "", "", ""],
                &["", "", "", "5", "5"],
                &["C1", "INE002A01018", "0", "50", "50"],
                &["C2", "BADISIN", "0", "1", "1"],
                &["C3", "INE009A01021", "0", "10", "100"],
            ],
        );
        let profile = profile_for(SourceSystem::Hdfc, DataKind::Custody);
        let mapping = resolve(profile, &data.headers);
        let ctx = RowContext {
            source_system: SourceSystem::Hdfc,
            file_name: "hdfc_holding_30062024.csv",
            record_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        };

        let (records, report) = normalize_custody(&data, &mapping, &ctx, &ValidationOptions::default());

        assert_eq!(report.rows_read, 6);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.accepted, 3);
        assert_eq!(report.merged_duplicates, 1);
        // duplicate note + balance mismatch on C3
        assert_eq!(report.warnings, 2);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].total_position, Some(BigDecimal::from_str("150").unwrap()));
        assert_eq!(records[0].saleable_quantity, Some(BigDecimal::from_str("140").unwrap()));
        assert!(records[1].balance_mismatch);
    }
}
