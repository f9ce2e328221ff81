use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::custodian::{DataKind, SourceSystem};
use super::error::AppError;

/// Staging collection name following the `category.date.subcategory` convention,
/// e.g. `custody.2024-06-30.hdfc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionName {
    pub kind: DataKind,
    pub record_date: NaiveDate,
    pub source: SourceSystem,
}

impl CollectionName {
    pub fn new(kind: DataKind, record_date: NaiveDate, source: SourceSystem) -> Self {
        Self {
            kind,
            record_date,
            source,
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            self.kind.as_str(),
            self.record_date.format("%Y-%m-%d"),
            self.source.slug()
        )
    }
}

impl FromStr for CollectionName {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(AppError::ValidationError(format!(
                "Collection name must look like category.YYYY-MM-DD.source: {}",
                s
            )));
        }
        let kind = parts[0].parse::<DataKind>()?;
        let record_date = NaiveDate::parse_from_str(parts[1], "%Y-%m-%d").map_err(|e| {
            AppError::ValidationError(format!("Invalid date in collection name {}: {}", s, e))
        })?;
        let source = parts[2].parse::<SourceSystem>()?;
        Ok(Self::new(kind, record_date, source))
    }
}

impl Serialize for CollectionName {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CollectionName {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Selects staged collections for the ETL pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionFilter {
    All,
    Kind(DataKind),
    KindAndDate(DataKind, NaiveDate),
    Exact(CollectionName),
    /// Old `type_MM_DD` names carried no year or source: any year, any source.
    Legacy { kind: DataKind, month: u32, day: u32 },
}

impl CollectionFilter {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let value = raw.trim().to_ascii_lowercase();
        if value.is_empty() || value == "*" || value == "all" {
            return Ok(CollectionFilter::All);
        }

        let parts: Vec<&str> = value.split('.').collect();
        match parts.len() {
            3 => return Ok(CollectionFilter::Exact(value.parse()?)),
            2 => {
                let kind = parts[0].parse::<DataKind>()?;
                let date = NaiveDate::parse_from_str(parts[1], "%Y-%m-%d").map_err(|e| {
                    AppError::ValidationError(format!("Invalid date in filter {}: {}", raw, e))
                })?;
                return Ok(CollectionFilter::KindAndDate(kind, date));
            }
            1 => {}
            _ => {
                return Err(AppError::ValidationError(format!(
                    "Unrecognised collection filter: {}",
                    raw
                )))
            }
        }

        let segments: Vec<&str> = value.rsplitn(3, '_').collect();
        if segments.len() == 3 {
            let (day, month, kind) = (segments[0], segments[1], segments[2]);
            if let (Ok(month), Ok(day)) = (month.parse::<u32>(), day.parse::<u32>()) {
                if (1..=12).contains(&month) && (1..=31).contains(&day) {
                    let kind = kind.parse::<DataKind>()?;
                    return Ok(CollectionFilter::Legacy { kind, month, day });
                }
            }
        }

        Ok(CollectionFilter::Kind(value.parse()?))
    }

    pub fn matches(&self, name: &CollectionName) -> bool {
        match self {
            CollectionFilter::All => true,
            CollectionFilter::Kind(kind) => name.kind == *kind,
            CollectionFilter::KindAndDate(kind, date) => {
                name.kind == *kind && name.record_date == *date
            }
            CollectionFilter::Exact(exact) => exact == name,
            CollectionFilter::Legacy { kind, month, day } => {
                name.kind == *kind
                    && name.record_date.month() == *month
                    && name.record_date.day() == *day
            }
        }
    }
}

/// Metadata of one staged collection. Rows live next to it in the staging store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedCollection {
    pub name: CollectionName,
    pub file_name: String,
    pub checksum: String,
    pub row_count: i64,
    pub staged_at: DateTime<Utc>,
}

impl StagedCollection {
    pub fn source_system(&self) -> SourceSystem {
        self.name.source
    }

    pub fn data_kind(&self) -> DataKind {
        self.name.kind
    }

    pub fn record_date(&self) -> NaiveDate {
        self.name.record_date
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StagingStats {
    pub collections: i64,
    pub rows: i64,
    pub by_collection: Vec<(String, i64)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_collection_name_format_and_parse() {
        let name = CollectionName::new(DataKind::Custody, date(2024, 6, 30), SourceSystem::Hdfc);
        assert_eq!(name.to_string(), "custody.2024-06-30.hdfc");
        assert_eq!("custody.2024-06-30.hdfc".parse::<CollectionName>().unwrap(), name);
        assert!("custody_06_30".parse::<CollectionName>().is_err());
    }

    #[test]
    fn test_legacy_filter_matches_any_year_and_source() {
        let filter = CollectionFilter::parse("custody_06_30").unwrap();
        assert_eq!(
            filter,
            CollectionFilter::Legacy {
                kind: DataKind::Custody,
                month: 6,
                day: 30
            }
        );

        let a = CollectionName::new(DataKind::Custody, date(2023, 6, 30), SourceSystem::Axis);
        let b = CollectionName::new(DataKind::Transactions, date(2023, 6, 30), SourceSystem::Axis);
        assert!(filter.matches(&a));
        assert!(!filter.matches(&b));
    }

    #[test]
    fn test_filter_variants() {
        assert_eq!(CollectionFilter::parse("").unwrap(), CollectionFilter::All);
        assert_eq!(
            CollectionFilter::parse("transactions").unwrap(),
            CollectionFilter::Kind(DataKind::Transactions)
        );
        assert_eq!(
            CollectionFilter::parse("custody.2024-01-31").unwrap(),
            CollectionFilter::KindAndDate(DataKind::Custody, date(2024, 1, 31))
        );
        assert!(CollectionFilter::parse("custody_13_01").is_err());
    }
}
