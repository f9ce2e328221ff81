// Cell string → typed value. Every parser treats placeholder cells as absent
// and reports unparseable input as an error message, never a panic.

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::str::FromStr;

use crate::domain::sheet::clean_cell;

const ABSENT_MARKERS: &[&str] = &["", "-", "--", "nil", "na", "n/a", "null", "none", "#n/a"];

// Excel's day zero; serial 60 is the phantom 1900-02-29, ignored for modern dates.
const EXCEL_EPOCH: (i32, u32, u32) = (1899, 12, 30);
// 9999-12-31
const EXCEL_MAX_SERIAL: f64 = 2_958_465.0;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%d-%b-%y",
    "%Y/%m/%d",
    "%Y%m%d",
];

fn is_absent(value: &str) -> bool {
    ABSENT_MARKERS.contains(&value.trim().to_ascii_lowercase().as_str())
}

/// Trimmed text with inner whitespace collapsed; empty or placeholder cells are absent.
pub fn parse_text(raw: &str) -> Option<String> {
    let cleaned = clean_cell(raw);
    if is_absent(&cleaned) {
        None
    } else {
        Some(cleaned)
    }
}

/// Upper-cased with inner spaces removed.
pub fn parse_isin(raw: &str) -> Option<String> {
    parse_text(raw).map(|s| s.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_ascii_uppercase())
}

/// Accounting-formatted numbers: `1,234.50`, `(120)`, `120-`, `₹ 5,000`, `1.2E3`.
pub fn parse_decimal(raw: &str) -> Result<Option<BigDecimal>, String> {
    let trimmed = clean_cell(raw);
    if is_absent(&trimmed) {
        return Ok(None);
    }

    let mut negative = false;
    let mut body: &str = &trimmed;
    if body.starts_with('(') && body.ends_with(')') && body.len() > 2 {
        negative = true;
        body = &body[1..body.len() - 1];
    }
    if let Some(stripped) = body.strip_suffix('-') {
        negative = !negative;
        body = stripped;
    }

    let lowered = body.to_ascii_lowercase();
    let without_currency = lowered
        .trim_start_matches("inr")
        .trim_start_matches("rs.")
        .trim_start_matches("rs");
    let digits: String = without_currency
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '₹' | '$' | '€' | '£' | '\''))
        .collect();

    if digits.is_empty() || digits == "-" {
        return Ok(None);
    }

    let value = BigDecimal::from_str(&digits).map_err(|_| format!("not a number: '{}'", raw.trim()))?;
    Ok(Some(if negative { -value } else { value }))
}

/// Calendar dates in the layouts custodians use, or an Excel serial number.
pub fn parse_date(raw: &str) -> Result<Option<NaiveDate>, String> {
    let trimmed = clean_cell(raw);
    if is_absent(&trimmed) {
        return Ok(None);
    }

    // "2024-06-30 00:00:00" and "2024-06-30T00:00:00" keep only the date part.
    let date_part = trimmed
        .split(|c| c == ' ' || c == 'T')
        .next()
        .unwrap_or(&trimmed);

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Ok(Some(date));
        }
        if let Ok(date) = NaiveDate::parse_from_str(&trimmed, format) {
            return Ok(Some(date));
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(&trimmed, "%Y-%m-%d %H:%M:%S") {
        return Ok(Some(dt.date()));
    }

    if let Ok(serial) = trimmed.parse::<f64>() {
        if let Some(date) = excel_serial_to_date(serial) {
            return Ok(Some(date));
        }
    }

    Err(format!("not a date: '{}'", raw.trim()))
}

pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 || serial > EXCEL_MAX_SERIAL {
        return None;
    }
    let (y, m, d) = EXCEL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_signed(Duration::days(serial.floor() as i64))
}
