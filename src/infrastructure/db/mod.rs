pub mod staging;
pub mod warehouse;

use async_trait::async_trait;

use crate::domain::contract_note::ContractNoteBatch;
use crate::domain::custody_record::CustodySnapshot;
use crate::domain::error::Result;
use crate::domain::ingest_report::{ClearScope, IngestRun, WarehouseStats};
use crate::domain::sheet::RawSheet;
use crate::domain::staging::{CollectionName, StagedCollection, StagingStats};

/// Intermediate store holding raw sheets between parsing and loading.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Replace every row of the collection with `sheet`. Returns rows written.
    async fn replace_collection(&self, collection: &StagedCollection, sheet: &RawSheet)
        -> Result<u64>;

    async fn list_collections(&self) -> Result<Vec<StagedCollection>>;

    async fn load_collection(&self, name: &CollectionName) -> Result<(StagedCollection, RawSheet)>;

    /// Returns false when the collection did not exist.
    async fn drop_collection(&self, name: &CollectionName) -> Result<bool>;

    /// Drop every collection. Returns how many were removed.
    async fn clear(&self) -> Result<u64>;

    async fn stats(&self) -> Result<StagingStats>;
}

/// Reporting database the normalized records end up in.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    /// Replace the (source, date) snapshot in the master and shadow tables.
    /// Returns rows written to the master table.
    async fn replace_custody_snapshot(&self, snapshot: &CustodySnapshot) -> Result<u64>;

    async fn replace_contract_notes(&self, batch: &ContractNoteBatch) -> Result<u64>;

    async fn record_run(&self, run: &IngestRun) -> Result<()>;

    async fn stats(&self) -> Result<WarehouseStats>;

    /// Returns rows deleted across master tables.
    async fn clear(&self, scope: &ClearScope) -> Result<u64>;
}

/// Split a schema file into statements. Semicolons inside quotes and `--` comments
/// are ignored.
pub(crate) fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut buf = String::new();
    let mut in_single = false;
    let mut in_line_comment = false;

    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if in_line_comment {
            if c == '\n' {
                in_line_comment = false;
                buf.push(c);
            }
            continue;
        }

        match c {
            '-' if !in_single && chars.peek() == Some(&'-') => {
                in_line_comment = true;
                chars.next();
            }
            '\'' => {
                in_single = !in_single;
                buf.push(c);
            }
            ';' if !in_single => {
                let stmt = buf.trim();
                if !stmt.is_empty() {
                    out.push(stmt.to_string());
                }
                buf.clear();
            }
            _ => buf.push(c),
        }
    }

    let tail = buf.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sql_statements() {
        let sql = "-- header; comment\nCREATE TABLE a (x TEXT DEFAULT 'a;b');\n\nCREATE INDEX i ON a(x);";
        let statements = split_sql_statements(sql);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (x TEXT DEFAULT 'a;b')");
        assert_eq!(statements[1], "CREATE INDEX i ON a(x)");
    }
}
