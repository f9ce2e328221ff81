use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::application::use_cases::collection_loader::CollectionLoader;
use crate::application::use_cases::custodian_profiles::{
    all_profile_aliases, detect_from_headers, profile_for,
};
use crate::application::use_cases::record_validation::ValidationOptions;
use crate::application::use_cases::source_detection::{classify_file_name, resolve_record_date};
use crate::domain::custodian::{DataKind, SourceSystem};
use crate::domain::error::{AppError, Result};
use crate::domain::field_mapping::CustodianProfile;
use crate::domain::ingest_report::{BatchReport, IngestReport, IngestRun, RunStatus};
use crate::domain::sheet::{Grid, RawSheet};
use crate::domain::staging::{CollectionName, StagedCollection};
use crate::infrastructure::config::IngestConfig;
use crate::infrastructure::db::{StagingStore, WarehouseStore};
use crate::infrastructure::spreadsheet::{locate_header, read_grid};
use crate::infrastructure::storage::{archive_file, file_checksum, list_input_files};
use crate::shared::log_buffer::{add_log, SharedLogs};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestOptions {
    /// Wins over any date in the file name.
    #[serde(default)]
    pub record_date: Option<NaiveDate>,
    /// Stage the raw sheet but leave the warehouse untouched.
    #[serde(default)]
    pub stage_only: bool,
    /// Move the file to the processed or failed directory afterwards.
    #[serde(default)]
    pub archive: bool,
}

pub struct FileIngestionUseCase {
    staging: Arc<dyn StagingStore>,
    warehouse: Arc<dyn WarehouseStore>,
    loader: CollectionLoader,
    config: IngestConfig,
    logs: SharedLogs,
}

/// Where the sheet came from and what it holds, once known.
struct Layout {
    source: SourceSystem,
    kind: DataKind,
    profile: &'static CustodianProfile,
    grid: Grid,
}

impl FileIngestionUseCase {
    pub fn new(
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn WarehouseStore>,
        config: IngestConfig,
        logs: SharedLogs,
    ) -> Self {
        let options = ValidationOptions::new(config.balance_tolerance_pct, config.strict_balance_check);
        Self {
            staging,
            loader: CollectionLoader::new(warehouse.clone(), options),
            warehouse,
            config,
            logs,
        }
    }

    /// A single file, or every supported file directly inside a directory.
    pub async fn ingest_path(&self, path: &Path, options: &IngestOptions) -> Result<BatchReport> {
        if !path.exists() {
            return Err(AppError::NotFound(format!("{} does not exist", path.display())));
        }

        let files = if path.is_dir() {
            list_input_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        add_log(
            &self.logs,
            "INFO",
            "Ingest",
            &format!("Processing {} file(s) from {}", files.len(), path.display()),
        );

        let mut batch = BatchReport::default();
        for file in files {
            batch.push(self.ingest_file(&file, options).await);
        }

        add_log(
            &self.logs,
            "INFO",
            "Ingest",
            &format!(
                "Done: {} succeeded, {} failed, {} rows accepted, {} rejected",
                batch.succeeded, batch.failed, batch.rows_accepted, batch.rows_rejected
            ),
        );
        Ok(batch)
    }

    /// Never fails: problems end up in the report's status and error.
    pub async fn ingest_file(&self, path: &Path, options: &IngestOptions) -> IngestReport {
        let started_at = Utc::now();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let mut report = IngestReport {
            run_id: Uuid::new_v4(),
            file_name: file_name.clone(),
            source_system: None,
            data_kind: None,
            record_date: None,
            collection: None,
            staged_rows: 0,
            load: None,
            status: RunStatus::Failed,
            error: None,
        };
        let mut checksum = None;

        add_log(&self.logs, "INFO", "Ingest", &format!("Starting import: {}", file_name));

        match self.process(path, options, &mut report, &mut checksum).await {
            Ok(()) => {
                add_log(
                    &self.logs,
                    "INFO",
                    "Ingest",
                    &format!("{} {}", file_name, report.status.as_str()),
                );
            }
            Err(e) => {
                report.status = RunStatus::Failed;
                report.error = Some(e.to_string());
                add_log(&self.logs, "ERROR", "Ingest", &format!("{} failed: {}", file_name, e));
            }
        }

        if !options.stage_only {
            self.record_run(&report, checksum, started_at).await;
        }

        if options.archive && path.is_file() {
            let target = if report.status == RunStatus::Failed {
                &self.config.failed_dir
            } else {
                &self.config.processed_dir
            };
            if let Err(e) = archive_file(path, target) {
                add_log(
                    &self.logs,
                    "WARN",
                    "Ingest",
                    &format!("Could not archive {}: {}", file_name, e),
                );
            }
        }

        report
    }

    async fn process(
        &self,
        path: &Path,
        options: &IngestOptions,
        report: &mut IngestReport,
        checksum: &mut Option<String>,
    ) -> Result<()> {
        let classification = classify_file_name(&report.file_name);
        report.source_system = classification.source_system;
        report.data_kind = classification.data_kind;
        report.record_date = classification.record_date;

        let record_date = resolve_record_date(options.record_date, &classification, &report.file_name)?;
        report.record_date = Some(record_date);

        *checksum = Some(file_checksum(path)?);

        let layout = self.detect_layout(path, classification.source_system, classification.data_kind)?;
        report.source_system = Some(layout.source);
        report.data_kind = Some(layout.kind);

        let aliases: Vec<&str> = layout.profile.all_aliases().collect();
        let header_row = locate_header(
            &layout.grid,
            &aliases,
            layout.profile.header_row,
            self.config.header_scan_rows,
        )
        .ok_or_else(|| {
            AppError::ValidationError(format!(
                "No header row found in the first {} rows of {}",
                self.config.header_scan_rows, report.file_name
            ))
        })?;
        let sheet = RawSheet::from_grid(&layout.grid, header_row);

        let collection = StagedCollection {
            name: CollectionName::new(layout.kind, record_date, layout.source),
            file_name: report.file_name.clone(),
            checksum: checksum.clone().unwrap_or_default(),
            row_count: sheet.len() as i64,
            staged_at: Utc::now(),
        };
        report.collection = Some(collection.name.to_string());

        self.staging.replace_collection(&collection, &sheet).await?;
        report.staged_rows = sheet.len();
        report.status = RunStatus::Staged;

        if options.stage_only {
            return Ok(());
        }

        let load = self.loader.load(&collection, &sheet).await?;
        report.load = Some(load);
        report.status = RunStatus::Loaded;
        Ok(())
    }

    /// Profile from the file name when it names both source and kind, otherwise from
    /// the header signature of the sheet.
    fn detect_layout(
        &self,
        path: &Path,
        source: Option<SourceSystem>,
        kind: Option<DataKind>,
    ) -> Result<Layout> {
        if let (Some(source), Some(kind)) = (source, kind) {
            let profile = profile_for(source, kind);
            let grid = read_grid(path, profile.sheet_name)?;
            return Ok(Layout {
                source,
                kind,
                profile,
                grid,
            });
        }

        let grid = read_grid(path, None)?;
        let known_aliases = all_profile_aliases();
        let detected = locate_header(&grid, &known_aliases, None, self.config.header_scan_rows)
            .and_then(|idx| grid.get(idx))
            .and_then(|headers| detect_from_headers(headers));

        let kind = kind
            .or_else(|| detected.map(|p| p.data_kind))
            .ok_or_else(|| {
                AppError::ValidationError(
                    "Cannot tell whether the file holds custody or transactions".to_string(),
                )
            })?;
        let source = source
            .or_else(|| {
                detected
                    .map(|p| p.source_system)
                    .filter(|s| *s != SourceSystem::Generic)
            })
            .unwrap_or(SourceSystem::Generic);
        let profile = profile_for(source, kind);

        // A named sheet in the matched profile means the first sheet was the wrong one.
        let grid = match profile.sheet_name {
            Some(sheet) => read_grid(path, Some(sheet))?,
            None => grid,
        };

        Ok(Layout {
            source,
            kind,
            profile,
            grid,
        })
    }

    async fn record_run(
        &self,
        report: &IngestReport,
        checksum: Option<String>,
        started_at: chrono::DateTime<Utc>,
    ) {
        let load = report.load.clone().unwrap_or_default();
        let run = IngestRun {
            run_id: report.run_id,
            file_name: report.file_name.clone(),
            checksum,
            source_system: report.source_system,
            data_kind: report.data_kind,
            record_date: report.record_date,
            rows_read: load.rows_read as i64,
            accepted: load.accepted as i64,
            rejected: load.rejected as i64,
            skipped: load.skipped as i64,
            warnings: load.warnings as i64,
            status: report.status,
            error: report.error.clone(),
            started_at,
            finished_at: Utc::now(),
        };
        if let Err(e) = self.warehouse.record_run(&run).await {
            add_log(
                &self.logs,
                "WARN",
                "Ingest",
                &format!("Could not record run for {}: {}", report.file_name, e),
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::contract_note::ContractNoteBatch;
    use crate::domain::custody_record::CustodySnapshot;
    use crate::domain::ingest_report::{ClearScope, WarehouseStats};
    use crate::infrastructure::config::AppConfig;
    use crate::infrastructure::db::staging::StagingRepository;
    use crate::infrastructure::spreadsheet::write_test_workbook;
    use crate::shared::log_buffer::new_log_buffer;
    use async_trait::async_trait;
    use bigdecimal::BigDecimal;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Warehouse double keeping snapshots in memory, keyed like the real tables.
    #[derive(Default)]
    pub(crate) struct MemoryWarehouse {
        pub custody: Mutex<HashMap<(SourceSystem, NaiveDate), CustodySnapshot>>,
        pub notes: Mutex<HashMap<(SourceSystem, NaiveDate), ContractNoteBatch>>,
        pub runs: Mutex<Vec<IngestRun>>,
    }

    #[async_trait]
    impl WarehouseStore for MemoryWarehouse {
        async fn replace_custody_snapshot(&self, snapshot: &CustodySnapshot) -> Result<u64> {
            let rows = snapshot.records.len() as u64;
            self.custody
                .lock()
                .unwrap()
                .insert((snapshot.source_system, snapshot.record_date), snapshot.clone());
            Ok(rows)
        }

        async fn replace_contract_notes(&self, batch: &ContractNoteBatch) -> Result<u64> {
            let rows = batch.notes.len() as u64;
            self.notes
                .lock()
                .unwrap()
                .insert((batch.source_system, batch.record_date), batch.clone());
            Ok(rows)
        }

        async fn record_run(&self, run: &IngestRun) -> Result<()> {
            self.runs.lock().unwrap().push(run.clone());
            Ok(())
        }

        async fn stats(&self) -> Result<WarehouseStats> {
            let custody_rows = self
                .custody
                .lock()
                .unwrap()
                .values()
                .map(|s| s.records.len() as i64)
                .sum();
            let contract_note_rows = self
                .notes
                .lock()
                .unwrap()
                .values()
                .map(|b| b.notes.len() as i64)
                .sum();
            Ok(WarehouseStats {
                custody_rows,
                contract_note_rows,
                runs: self.runs.lock().unwrap().len() as i64,
                snapshots: Vec::new(),
            })
        }

        async fn clear(&self, scope: &ClearScope) -> Result<u64> {
            let in_scope = |source: &SourceSystem, date: &NaiveDate| {
                scope.source_system.map_or(true, |s| s == *source)
                    && scope.record_date.map_or(true, |d| d == *date)
            };
            let mut custody = self.custody.lock().unwrap();
            let before: usize = custody.values().map(|s| s.records.len()).sum();
            custody.retain(|(source, date), _| !in_scope(source, date));
            let after: usize = custody.values().map(|s| s.records.len()).sum();
            Ok((before - after) as u64)
        }
    }

    pub(crate) fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("custody-etl-ingest-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    pub(crate) async fn use_case(
        dir: &Path,
    ) -> (FileIngestionUseCase, Arc<StagingRepository>, Arc<MemoryWarehouse>) {
        let staging = Arc::new(StagingRepository::connect("sqlite::memory:", 1).await.unwrap());
        let warehouse = Arc::new(MemoryWarehouse::default());
        let mut config = AppConfig::default().ingest;
        config.processed_dir = dir.join("processed");
        config.failed_dir = dir.join("failed");
        let use_case = FileIngestionUseCase::new(
            staging.clone(),
            warehouse.clone(),
            config,
            new_log_buffer(),
        );
        (use_case, staging, warehouse)
    }

    const HDFC_CSV: &str = "HDFC Securities - Holding Statement\n\
        As on 30/06/2024\n\
        \n\
        Client Code,Client Name,ISIN,Security Name,Pledged Qty,Free Balance,Total Balance\n\
        C001,Asha Rao,INE002A01018,RELIANCE INDUSTRIES,10,90,100\n\
        C001,Asha Rao,INE009A01021,INFOSYS,0,40,50\n\
        ,,,,,,\n\
        C002,Vikram N,BADISIN,UNKNOWN,0,1,1\n";

    #[tokio::test]
    async fn test_ingest_file_stages_and_loads() {
        let dir = scratch_dir();
        let file = dir.join("hdfc_holding_30062024.csv");
        std::fs::write(&file, HDFC_CSV).unwrap();
        let (use_case, staging, warehouse) = use_case(&dir).await;

        let report = use_case.ingest_file(&file, &IngestOptions::default()).await;

        assert_eq!(report.status, RunStatus::Loaded, "{:?}", report.error);
        assert_eq!(report.collection.as_deref(), Some("custody.2024-06-30.hdfc"));
        assert_eq!(report.staged_rows, 4);
        let load = report.load.unwrap();
        assert_eq!(load.rows_read, 4);
        assert_eq!(load.skipped, 1);
        assert_eq!(load.accepted, 2);
        assert_eq!(load.rejected, 1);
        assert_eq!(load.warnings, 1);
        assert_eq!(load.target_tables, vec!["unified_custody_master", "custody_snapshot_2024_06_30"]);

        let stats = staging.stats().await.unwrap();
        assert_eq!(stats.collections, 1);
        assert_eq!(warehouse.runs.lock().unwrap().len(), 1);

        let date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let snapshot = warehouse.custody.lock().unwrap()[&(SourceSystem::Hdfc, date)].clone();
        assert_eq!(snapshot.records.len(), 2);
        assert!(snapshot.records[1].balance_mismatch);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_reingest_replaces_rather_than_duplicates() {
        let dir = scratch_dir();
        let file = dir.join("hdfc_holding_30062024.csv");
        std::fs::write(&file, HDFC_CSV).unwrap();
        let (use_case, staging, warehouse) = use_case(&dir).await;

        use_case.ingest_file(&file, &IngestOptions::default()).await;
        use_case.ingest_file(&file, &IngestOptions::default()).await;

        assert_eq!(staging.stats().await.unwrap().rows, 4);
        assert_eq!(warehouse.stats().await.unwrap().custody_rows, 2);
        assert_eq!(warehouse.runs.lock().unwrap().len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_date_fails_and_archives_to_failed() {
        let dir = scratch_dir();
        let file = dir.join("hdfc_holding.csv");
        std::fs::write(&file, HDFC_CSV).unwrap();
        let (use_case, _staging, warehouse) = use_case(&dir).await;

        let options = IngestOptions {
            archive: true,
            ..Default::default()
        };
        let report = use_case.ingest_file(&file, &options).await;

        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.error.unwrap().contains("record date"));
        assert!(!file.exists());
        assert!(dir.join("failed").join("hdfc_holding.csv").exists());
        assert_eq!(warehouse.runs.lock().unwrap()[0].status, RunStatus::Failed);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_stage_only_and_header_signature_detection() {
        let dir = scratch_dir();
        // No source or kind in the name: the Deutsche signature gives both away.
        let file = dir.join("export_2024-03-28.csv");
        std::fs::write(
            &file,
            "Safekeeping Account;ISIN;Security Description;Settled Position;Blocked Position\n\
             DB-001;US0378331005;APPLE INC;500;20\n",
        )
        .unwrap();
        let (use_case, staging, warehouse) = use_case(&dir).await;

        let options = IngestOptions {
            stage_only: true,
            ..Default::default()
        };
        let report = use_case.ingest_file(&file, &options).await;

        assert_eq!(report.status, RunStatus::Staged, "{:?}", report.error);
        assert_eq!(report.source_system, Some(SourceSystem::Deutsche));
        assert_eq!(report.collection.as_deref(), Some("custody.2024-03-28.deutsche"));
        assert_eq!(staging.stats().await.unwrap().rows, 1);
        assert!(warehouse.custody.lock().unwrap().is_empty());
        assert!(warehouse.runs.lock().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    const ORBIS_HOLDINGS: &[&[&str]] = &[
        &["Orbis Financial - Custody Holdings", "", "", "", "", "", "", "", ""],
        &["As on 30-Jun-2024", "", "", "", "", "", "", "", ""],
        &["", "", "", "", "", "", "", "", ""],
        &[
            "BOID", "Client Name", "ISIN", "Security Name", "Pledge Qty", "Lockin Qty",
            "Earmarked Qty", "Free Qty", "Total Qty",
        ],
        &["B1", "Meera Iyer", "INE002A01018", "RELIANCE", "5", "3", "2", "90", "100"],
        &["B2", "Kiran Das", "INE009A01021", "INFOSYS", "0", "0", "0", "40", "40"],
    ];

    #[tokio::test]
    async fn test_orbis_workbook_uses_holdings_sheet() {
        let dir = scratch_dir();
        let file = dir.join("orbis_holdings_30062024.xlsx");
        write_test_workbook(
            &file,
            &[("Summary", &[&["Clients", "2"]]), ("Holdings", ORBIS_HOLDINGS)],
        );
        let (use_case, staging, warehouse) = use_case(&dir).await;

        let report = use_case.ingest_file(&file, &IngestOptions::default()).await;

        assert_eq!(report.status, RunStatus::Loaded, "{:?}", report.error);
        assert_eq!(report.collection.as_deref(), Some("custody.2024-06-30.orbis"));
        assert_eq!(report.staged_rows, 2);

        let name: CollectionName = "custody.2024-06-30.orbis".parse().unwrap();
        let (_, sheet) = staging.load_collection(&name).await.unwrap();
        assert_eq!(sheet.header_row, 3);

        let date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let snapshot = warehouse.custody.lock().unwrap()[&(SourceSystem::Orbis, date)].clone();
        assert_eq!(snapshot.records.len(), 2);
        let reliance = &snapshot.records[0];
        assert_eq!(reliance.blocked_quantity, Some(BigDecimal::from(10)));
        assert!(!reliance.balance_mismatch);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_workbook_source_detected_from_headers() {
        let dir = scratch_dir();
        let file = dir.join("holdings_2024-06-30.xlsx");
        write_test_workbook(
            &file,
            &[("Holdings", ORBIS_HOLDINGS), ("Notes", &[&["Generated by back office"]])],
        );
        let (use_case, _staging, warehouse) = use_case(&dir).await;

        let report = use_case.ingest_file(&file, &IngestOptions::default()).await;

        assert_eq!(report.status, RunStatus::Loaded, "{:?}", report.error);
        assert_eq!(report.source_system, Some(SourceSystem::Orbis));
        assert_eq!(warehouse.stats().await.unwrap().custody_rows, 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_directory_run_survives_bad_files() {
        let dir = scratch_dir();
        std::fs::write(dir.join("hdfc_holding_30062024.csv"), HDFC_CSV).unwrap();
        std::fs::write(dir.join("mystery.csv"), "a,b\n1,2\n").unwrap();
        let (use_case, _staging, _warehouse) = use_case(&dir).await;

        let batch = use_case.ingest_path(&dir, &IngestOptions::default()).await.unwrap();

        assert_eq!(batch.files, 2);
        assert_eq!(batch.succeeded, 1);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.rows_accepted, 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
