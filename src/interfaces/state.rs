use std::sync::Arc;

use crate::application::{FileIngestionUseCase, StagedEtlUseCase};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::db::{StagingStore, WarehouseStore};
use crate::shared::log_buffer::SharedLogs;

/// Everything the CLI and the HTTP API share.
pub struct AppState {
    pub config: AppConfig,
    pub staging: Arc<dyn StagingStore>,
    pub warehouse: Arc<dyn WarehouseStore>,
    pub ingestion: FileIngestionUseCase,
    pub etl: StagedEtlUseCase,
    pub logs: SharedLogs,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        staging: Arc<dyn StagingStore>,
        warehouse: Arc<dyn WarehouseStore>,
        logs: SharedLogs,
    ) -> Self {
        let ingestion = FileIngestionUseCase::new(
            staging.clone(),
            warehouse.clone(),
            config.ingest.clone(),
            logs.clone(),
        );
        let etl = StagedEtlUseCase::new(
            staging.clone(),
            warehouse.clone(),
            &config.ingest,
            logs.clone(),
        );

        Self {
            config,
            staging,
            warehouse,
            ingestion,
            etl,
            logs,
        }
    }
}
