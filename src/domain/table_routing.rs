use chrono::NaiveDate;

use super::custodian::DataKind;
use super::error::{AppError, Result};

pub const CUSTODY_MASTER_TABLE: &str = "unified_custody_master";
pub const CONTRACT_NOTES_TABLE: &str = "contract_notes_master";
pub const INGEST_RUNS_TABLE: &str = "ingest_runs";
pub const SHADOW_TABLE_PREFIX: &str = "custody_snapshot_";

/// Where the records of one file end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRoute {
    pub master: String,
    /// Date-suffixed copy of the master; only custody snapshots have one.
    pub shadow: Option<String>,
}

pub fn route(kind: DataKind, record_date: NaiveDate) -> TableRoute {
    match kind {
        DataKind::Custody => TableRoute {
            master: CUSTODY_MASTER_TABLE.to_string(),
            shadow: Some(shadow_table_for(record_date)),
        },
        DataKind::Transactions => TableRoute {
            master: CONTRACT_NOTES_TABLE.to_string(),
            shadow: None,
        },
    }
}

/// `custody_snapshot_2024_06_30`
pub fn shadow_table_for(record_date: NaiveDate) -> String {
    format!("{}{}", SHADOW_TABLE_PREFIX, record_date.format("%Y_%m_%d"))
}

/// Inverse of [`shadow_table_for`]; None for anything else.
pub fn shadow_table_date(table: &str) -> Option<NaiveDate> {
    let suffix = table.strip_prefix(SHADOW_TABLE_PREFIX)?;
    NaiveDate::parse_from_str(suffix, "%Y_%m_%d").ok()
}

/// Table names are spliced into SQL text, so only `[a-z0-9_]` starting with a letter
/// is allowed.
pub fn checked_identifier(name: &str) -> Result<&str> {
    let valid = name.len() <= 63
        && name.chars().next().map_or(false, |c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(AppError::ValidationError(format!(
            "Refusing unsafe table name: {}",
            name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custody_routes_to_master_and_shadow() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
        let route = route(DataKind::Custody, date);
        assert_eq!(route.master, "unified_custody_master");
        assert_eq!(route.shadow.as_deref(), Some("custody_snapshot_2024_06_30"));
        assert_eq!(shadow_table_date("custody_snapshot_2024_06_30"), Some(date));
    }

    #[test]
    fn test_transactions_have_no_shadow() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let route = route(DataKind::Transactions, date);
        assert_eq!(route.master, "contract_notes_master");
        assert!(route.shadow.is_none());
    }

    #[test]
    fn test_checked_identifier() {
        assert!(checked_identifier("custody_snapshot_2024_06_30").is_ok());
        assert!(checked_identifier("Custody").is_err());
        assert!(checked_identifier("x; DROP TABLE y").is_err());
        assert!(checked_identifier("").is_err());
        assert_eq!(shadow_table_date("unified_custody_master"), None);
    }
}
