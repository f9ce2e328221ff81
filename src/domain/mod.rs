pub mod contract_note;
pub mod custodian;
pub mod custody_record;
pub mod error;
pub mod field_mapping;
pub mod ingest_report;
pub mod staging;
pub mod table_routing;

// Tabular input shared by the CSV and workbook readers
pub mod sheet;
