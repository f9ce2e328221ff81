pub mod collection_loader;
pub mod custodian_profiles;
pub mod file_ingestion;
pub mod record_normalizer;
pub mod record_validation;
pub mod source_detection;
pub mod staged_etl;
pub mod values;
