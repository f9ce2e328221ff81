use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::application::use_cases::collection_loader::CollectionLoader;
use crate::application::use_cases::record_validation::ValidationOptions;
use crate::domain::error::{AppError, Result};
use crate::domain::ingest_report::{EtlSummary, IngestRun, LoadReport, RunStatus};
use crate::domain::staging::{CollectionFilter, StagedCollection};
use crate::infrastructure::config::IngestConfig;
use crate::infrastructure::db::{StagingStore, WarehouseStore};
use crate::shared::log_buffer::{add_log, SharedLogs};

/// Loads staged collections into the warehouse, one task per collection.
pub struct StagedEtlUseCase {
    staging: Arc<dyn StagingStore>,
    warehouse: Arc<dyn WarehouseStore>,
    loader: Arc<CollectionLoader>,
    max_workers: usize,
    logs: SharedLogs,
}

impl StagedEtlUseCase {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn WarehouseStore>,
        config: &IngestConfig,
        logs: SharedLogs,
    ) -> Self {
        let options = ValidationOptions::new(config.balance_tolerance_pct, config.strict_balance_check);
        Self {
            staging,
            loader: Arc::new(CollectionLoader::new(warehouse.clone(), options)),
            warehouse,
            max_workers: config.max_workers.max(1),
            logs,
        }
    }

    /// Collections are disjoint, so workers share nothing but the stores. A failing
    /// worker is logged and counted; the rest carry on.
    pub async fn run(&self, filter: &CollectionFilter) -> Result<EtlSummary> {
        let collections: Vec<StagedCollection> = self
            .staging
            .list_collections()
            .await?
            .into_iter()
            .filter(|c| filter.matches(&c.name))
            .collect();

        let mut summary = EtlSummary {
            collections: collections.len(),
            ..Default::default()
        };
        if collections.is_empty() {
            add_log(&self.logs, "INFO", "ETL", "No staged collections match the filter");
            return Ok(summary);
        }

        add_log(
            &self.logs,
            "INFO",
            "ETL",
            &format!(
                "Loading {} collection(s) with up to {} workers",
                collections.len(),
                self.max_workers
            ),
        );

        let permits = Arc::new(Semaphore::new(self.max_workers));
        let mut workers = JoinSet::new();
        for collection in collections {
            let name = collection.name.to_string();
            let permits = permits.clone();
            let staging = self.staging.clone();
            let warehouse = self.warehouse.clone();
            let loader = self.loader.clone();

            workers.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => load_one(staging, warehouse, loader, collection).await,
                    Err(e) => Err(AppError::Internal(format!("Worker pool closed: {}", e))),
                };
                (name, outcome)
            });
        }

        while let Some(joined) = workers.join_next().await {
            let (name, outcome) = match joined {
                Ok(result) => result,
                Err(e) => (
                    "unknown".to_string(),
                    Err(AppError::Internal(format!("Worker panicked: {}", e))),
                ),
            };

            match outcome {
                Ok(report) => {
                    summary.succeeded += 1;
                    summary.rows_read += report.rows_read;
                    summary.rows_accepted += report.accepted;
                    summary.rows_rejected += report.rejected;
                    summary.rows_written += report.written;
                }
                Err(e) => {
                    summary.failed += 1;
                    add_log(&self.logs, "ERROR", "ETL", &format!("{} failed: {}", name, e));
                    summary.failures.push((name, e.to_string()));
                }
            }
        }

        summary.failures.sort();
        add_log(
            &self.logs,
            "INFO",
            "ETL",
            &format!(
                "ETL finished: {} succeeded, {} failed, {} rows written",
                summary.succeeded, summary.failed, summary.rows_written
            ),
        );
        Ok(summary)
    }
}

async fn load_one(
    staging: Arc<dyn StagingStore>,
    warehouse: Arc<dyn WarehouseStore>,
    loader: Arc<CollectionLoader>,
    collection: StagedCollection,
) -> Result<LoadReport> {
    let started_at = Utc::now();
    let outcome = match staging.load_collection(&collection.name).await {
        Ok((meta, sheet)) => loader.load(&meta, &sheet).await,
        Err(e) => Err(e),
    };

    let load = outcome.as_ref().ok().cloned().unwrap_or_default();
    let run = IngestRun {
        run_id: Uuid::new_v4(),
        file_name: collection.file_name.clone(),
        checksum: Some(collection.checksum.clone()),
        source_system: Some(collection.source_system()),
        data_kind: Some(collection.data_kind()),
        record_date: Some(collection.record_date()),
        rows_read: load.rows_read as i64,
        accepted: load.accepted as i64,
        rejected: load.rejected as i64,
        skipped: load.skipped as i64,
        warnings: load.warnings as i64,
        status: if outcome.is_ok() {
            RunStatus::Loaded
        } else {
            RunStatus::Failed
        },
        error: outcome.as_ref().err().map(|e| e.to_string()),
        started_at,
        finished_at: Utc::now(),
    };
    if let Err(e) = warehouse.record_run(&run).await {
        tracing::warn!(collection = %collection.name, "Could not record run: {}", e);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::file_ingestion::tests::MemoryWarehouse;
    use crate::domain::custodian::{DataKind, SourceSystem};
    use crate::domain::sheet::RawSheet;
    use crate::domain::staging::CollectionName;
    use crate::infrastructure::config::AppConfig;
    use crate::infrastructure::db::staging::StagingRepository;
    use crate::shared::log_buffer::new_log_buffer;
    use chrono::NaiveDate;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    async fn stage(
        staging: &StagingRepository,
        kind: DataKind,
        source: SourceSystem,
        headers: &[&str],
        rows: &[&[&str]],
    ) {
        let name = CollectionName::new(kind, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(), source);
        let sheet = RawSheet {
            headers: strings(headers),
            rows: rows.iter().map(|r| strings(r)).collect(),
            header_row: 0,
        };
        let collection = StagedCollection {
            name,
            file_name: format!("{}.csv", name),
            checksum: "abc".to_string(),
            row_count: sheet.len() as i64,
            staged_at: Utc::now(),
        };
        staging.replace_collection(&collection, &sheet).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_collection_does_not_stop_others() {
        let staging = Arc::new(StagingRepository::connect("sqlite::memory:", 1).await.unwrap());
        let warehouse = Arc::new(MemoryWarehouse::default());

        stage(
            &staging,
            DataKind::Custody,
            SourceSystem::Hdfc,
            &["Client Code", "ISIN", "Free Balance", "Total Balance"],
            &[&["C1", "INE002A01018", "10", "10"], &["C2", "INE009A01021", "5", "5"]],
        )
        .await;
        stage(
            &staging,
            DataKind::Custody,
            SourceSystem::Axis,
            &["Account No", "ISIN Code", "Saleable Qty", "Holding Qty"],
            &[&["A1", "INE040A01034", "7", "7"]],
        )
        .await;
        // No ISIN column at all: the whole collection fails.
        stage(
            &staging,
            DataKind::Custody,
            SourceSystem::Kotak,
            &["UCC", "Scrip Name"],
            &[&["K1", "TCS"]],
        )
        .await;

        let config = AppConfig::default().ingest;
        let etl = StagedEtlUseCase::new(staging.clone(), warehouse.clone(), &config, new_log_buffer());
        let summary = etl.run(&CollectionFilter::All).await.unwrap();

        assert_eq!(summary.collections, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.rows_accepted, 3);
        assert_eq!(summary.rows_written, 3);
        assert_eq!(summary.failures[0].0, "custody.2024-06-30.kotak");
        assert_eq!(warehouse.runs.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_filter_limits_collections() {
        let staging = Arc::new(StagingRepository::connect("sqlite::memory:", 1).await.unwrap());
        let warehouse = Arc::new(MemoryWarehouse::default());
        stage(
            &staging,
            DataKind::Custody,
            SourceSystem::Hdfc,
            &["Client Code", "ISIN"],
            &[&["C1", "INE002A01018"]],
        )
        .await;
        stage(
            &staging,
            DataKind::Transactions,
            SourceSystem::Kotak,
            &["ECN No", "UCC", "ISIN", "B/S", "Traded Qty"],
            &[&["E1", "K1", "INE002A01018", "S", "3"]],
        )
        .await;

        let config = AppConfig::default().ingest;
        let etl = StagedEtlUseCase::new(staging.clone(), warehouse.clone(), &config, new_log_buffer());

        let legacy = CollectionFilter::parse("transactions_06_30").unwrap();
        let summary = etl.run(&legacy).await.unwrap();
        assert_eq!(summary.collections, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(warehouse.notes.lock().unwrap().len(), 1);
        assert!(warehouse.custody.lock().unwrap().is_empty());
    }
}
