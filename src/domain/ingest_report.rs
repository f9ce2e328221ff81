use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::custodian::{DataKind, SourceSystem};

/// Keep reports readable for files with thousands of bad rows.
pub const MAX_REPORTED_ISSUES: usize = 50;

/// Why a row was rejected, or what looked suspicious about an accepted one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowIssue {
    /// One-based row number in the data area (header excluded).
    pub row_number: usize,
    pub message: String,
}

/// Outcome of loading one staged collection into the warehouse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadReport {
    pub rows_read: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub warnings: usize,
    /// Rows merged into an earlier row with the same key.
    pub merged_duplicates: usize,
    /// Rows written to the master table.
    pub written: u64,
    pub target_tables: Vec<String>,
    pub rejections: Vec<RowIssue>,
    pub warning_samples: Vec<RowIssue>,
}

impl LoadReport {
    pub fn reject(&mut self, row_number: usize, reasons: &[String]) {
        self.rejected += 1;
        if self.rejections.len() < MAX_REPORTED_ISSUES {
            self.rejections.push(RowIssue {
                row_number,
                message: reasons.join("; "),
            });
        }
    }

    pub fn warn(&mut self, row_number: usize, message: &str) {
        self.warnings += 1;
        if self.warning_samples.len() < MAX_REPORTED_ISSUES {
            self.warning_samples.push(RowIssue {
                row_number,
                message: message.to_string(),
            });
        }
    }
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub run_id: Uuid,
    pub file_name: String,
    pub source_system: Option<SourceSystem>,
    pub data_kind: Option<DataKind>,
    pub record_date: Option<NaiveDate>,
    pub collection: Option<String>,
    pub staged_rows: usize,
    pub load: Option<LoadReport>,
    pub status: RunStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Loaded,
    Staged,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Loaded => "loaded",
            RunStatus::Staged => "staged",
            RunStatus::Failed => "failed",
        }
    }
}

/// Aggregate of a directory run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    pub reports: Vec<IngestReport>,
}

impl BatchReport {
    pub fn push(&mut self, report: IngestReport) {
        self.files += 1;
        if report.status == RunStatus::Failed {
            self.failed += 1;
        } else {
            self.succeeded += 1;
        }
        if let Some(load) = &report.load {
            self.rows_accepted += load.accepted;
            self.rows_rejected += load.rejected;
        }
        self.reports.push(report);
    }
}

/// Fan-in of the per-collection ETL workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlSummary {
    pub collections: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_read: usize,
    pub rows_accepted: usize,
    pub rows_rejected: usize,
    pub rows_written: u64,
    pub failures: Vec<(String, String)>,
}

/// Ledger row written for every processed file or collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRun {
    pub run_id: Uuid,
    pub file_name: String,
    pub checksum: Option<String>,
    pub source_system: Option<SourceSystem>,
    pub data_kind: Option<DataKind>,
    pub record_date: Option<NaiveDate>,
    pub rows_read: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub skipped: i64,
    pub warnings: i64,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Row count of one warehouse snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCount {
    pub table: String,
    pub source_system: String,
    pub record_date: NaiveDate,
    pub rows: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseStats {
    pub custody_rows: i64,
    pub contract_note_rows: i64,
    pub runs: i64,
    pub snapshots: Vec<SnapshotCount>,
}

/// What a warehouse clear removes. Empty scope means everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearScope {
    pub source_system: Option<SourceSystem>,
    pub record_date: Option<NaiveDate>,
}

impl ClearScope {
    pub fn is_everything(&self) -> bool {
        self.source_system.is_none() && self.record_date.is_none()
    }
}
