pub mod use_cases;

pub use use_cases::file_ingestion::{FileIngestionUseCase, IngestOptions};
pub use use_cases::staged_etl::StagedEtlUseCase;
