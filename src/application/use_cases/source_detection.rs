use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;

use crate::domain::custodian::{DataKind, SourceSystem};
use crate::domain::error::{AppError, Result};

static ISO_DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-_.](\d{1,2})[-_.](\d{1,2})").unwrap());
static DMY_DATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[-_.](\d{1,2})[-_.](\d{4})").unwrap());
static MONTH_NAME_DATE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,2})[-_. ]?(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*[-_. ]?(\d{4})")
        .unwrap()
});
static COMPACT_DATE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|\D)(\d{8})(?:\D|$)").unwrap());

// Checked in order against the name with separators removed.
const SOURCE_TOKENS: &[(&str, SourceSystem)] = &[
    ("trustpms", SourceSystem::TrustPms),
    ("hdfc", SourceSystem::Hdfc),
    ("axis", SourceSystem::Axis),
    ("kotak", SourceSystem::Kotak),
    ("orbis", SourceSystem::Orbis),
    ("deutsche", SourceSystem::Deutsche),
    ("dbag", SourceSystem::Deutsche),
    ("trust", SourceSystem::TrustPms),
];

const KIND_TOKENS: &[(&str, DataKind)] = &[
    ("custody", DataKind::Custody),
    ("holding", DataKind::Custody),
    ("position", DataKind::Custody),
    ("balance", DataKind::Custody),
    ("demat", DataKind::Custody),
    ("safekeeping", DataKind::Custody),
    ("ecn", DataKind::Transactions),
    ("contract", DataKind::Transactions),
    ("trade", DataKind::Transactions),
    ("transaction", DataKind::Transactions),
    ("txn", DataKind::Transactions),
    ("broker", DataKind::Transactions),
    ("deal", DataKind::Transactions),
];

/// What a file name tells about its content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileClassification {
    pub source_system: Option<SourceSystem>,
    pub data_kind: Option<DataKind>,
    pub record_date: Option<NaiveDate>,
}

pub fn classify_file_name(name: &str) -> FileClassification {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_ascii_lowercase();
    let compact: String = stem.chars().filter(|c| c.is_ascii_alphanumeric()).collect();

    let source_system = SOURCE_TOKENS
        .iter()
        .find(|(token, _)| compact.contains(token))
        .map(|(_, source)| *source);

    // Earliest kind token wins: "trade_positions" is a trade file.
    let data_kind = KIND_TOKENS
        .iter()
        .filter_map(|(token, kind)| compact.find(token).map(|pos| (pos, *kind)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, kind)| kind);

    FileClassification {
        source_system,
        data_kind,
        record_date: date_from_name(&stem),
    }
}

/// First valid calendar date found in a (lowercase) file stem.
pub fn date_from_name(stem: &str) -> Option<NaiveDate> {
    for caps in ISO_DATE_PATTERN.captures_iter(stem) {
        if let Some(date) = ymd(&caps[1], &caps[2], &caps[3]) {
            return Some(date);
        }
    }
    for caps in DMY_DATE_PATTERN.captures_iter(stem) {
        if let Some(date) = ymd(&caps[3], &caps[2], &caps[1]) {
            return Some(date);
        }
    }
    for caps in MONTH_NAME_DATE_PATTERN.captures_iter(stem) {
        let month = month_number(&caps[2])?;
        if let Some(date) = ymd(&caps[3], &month.to_string(), &caps[1]) {
            return Some(date);
        }
    }
    for caps in COMPACT_DATE_PATTERN.captures_iter(stem) {
        let digits = &caps[1];
        let as_ymd = ymd(&digits[0..4], &digits[4..6], &digits[6..8])
            .filter(|d| (2000..=2099).contains(&chrono::Datelike::year(d)));
        if let Some(date) = as_ymd.or_else(|| ymd(&digits[4..8], &digits[2..4], &digits[0..2])) {
            return Some(date);
        }
    }
    None
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS
        .iter()
        .position(|m| abbrev.starts_with(m))
        .map(|i| i as u32 + 1)
}

/// Explicit override, then the file name. A file with neither is rejected.
pub fn resolve_record_date(
    override_date: Option<NaiveDate>,
    classification: &FileClassification,
    file_name: &str,
) -> Result<NaiveDate> {
    override_date
        .or(classification.record_date)
        .ok_or_else(|| {
            AppError::ValidationError(format!(
                "Cannot determine record date for {}; pass a date explicitly",
                file_name
            ))
        })
}
