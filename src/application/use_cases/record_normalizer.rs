// Pulls canonical field values out of a staged row using a resolved header mapping.
// Nothing here decides whether a row is acceptable; see record_validation.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::application::use_cases::custodian_profiles::{ResolvedColumn, ResolvedMapping};
use crate::application::use_cases::values::{parse_date, parse_decimal, parse_isin, parse_text};
use crate::domain::custodian::SourceSystem;
use crate::domain::field_mapping::CanonicalField;

/// Provenance stamped onto every record of one collection.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub source_system: SourceSystem,
    pub file_name: &'a str,
    pub record_date: NaiveDate,
}

#[derive(Debug, Clone, Default)]
pub struct CustodyDraft {
    pub client_reference: Option<String>,
    pub client_name: Option<String>,
    pub instrument_isin: Option<String>,
    pub instrument_name: Option<String>,
    pub instrument_code: Option<String>,
    pub blocked_quantity: Option<BigDecimal>,
    pub pending_buy_quantity: Option<BigDecimal>,
    pub pending_sell_quantity: Option<BigDecimal>,
    pub total_position: Option<BigDecimal>,
    pub saleable_quantity: Option<BigDecimal>,
    /// Cells that were present but could not be parsed.
    pub parse_errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ContractNoteDraft {
    pub ecn_number: Option<String>,
    pub trade_date: Option<NaiveDate>,
    pub trade_side: Option<String>,
    pub client_reference: Option<String>,
    pub client_name: Option<String>,
    pub instrument_isin: Option<String>,
    pub instrument_name: Option<String>,
    pub quantity: Option<BigDecimal>,
    pub price: Option<BigDecimal>,
    pub gross_amount: Option<BigDecimal>,
    pub net_amount: Option<BigDecimal>,
    pub broker_code: Option<String>,
    pub parse_errors: Vec<String>,
}

/// Short rows are common in CSV exports; missing cells read as empty.
fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn first_column(mapping: &ResolvedMapping, field: CanonicalField) -> Option<usize> {
    match mapping.get(field)? {
        ResolvedColumn::Single(idx) => Some(*idx),
        ResolvedColumn::Sum(indices) => indices.first().copied(),
    }
}

fn text(row: &[String], mapping: &ResolvedMapping, field: CanonicalField) -> Option<String> {
    first_column(mapping, field).and_then(|idx| parse_text(cell(row, idx)))
}

fn isin(row: &[String], mapping: &ResolvedMapping) -> Option<String> {
    first_column(mapping, CanonicalField::InstrumentIsin).and_then(|idx| parse_isin(cell(row, idx)))
}

/// Sum columns add every present cell; all-absent stays absent.
fn decimal(
    row: &[String],
    mapping: &ResolvedMapping,
    field: CanonicalField,
    errors: &mut Vec<String>,
) -> Option<BigDecimal> {
    let indices: Vec<usize> = match mapping.get(field)? {
        ResolvedColumn::Single(idx) => vec![*idx],
        ResolvedColumn::Sum(indices) => indices.clone(),
    };

    let mut total: Option<BigDecimal> = None;
    for idx in indices {
        match parse_decimal(cell(row, idx)) {
            Ok(Some(value)) => {
                total = Some(match total {
                    Some(acc) => acc + value,
                    None => value,
                })
            }
            Ok(None) => {}
            Err(e) => errors.push(format!("{}: {}", field.as_str(), e)),
        }
    }
    total
}

fn date(
    row: &[String],
    mapping: &ResolvedMapping,
    field: CanonicalField,
    errors: &mut Vec<String>,
) -> Option<NaiveDate> {
    let idx = first_column(mapping, field)?;
    match parse_date(cell(row, idx)) {
        Ok(value) => value,
        Err(e) => {
            errors.push(format!("{}: {}", field.as_str(), e));
            None
        }
    }
}

pub fn extract_custody(row: &[String], mapping: &ResolvedMapping) -> CustodyDraft {
    use CanonicalField::*;

    let mut errors = Vec::new();
    CustodyDraft {
        client_reference: text(row, mapping, ClientReference),
        client_name: text(row, mapping, ClientName),
        instrument_isin: isin(row, mapping),
        instrument_name: text(row, mapping, InstrumentName),
        instrument_code: text(row, mapping, InstrumentCode),
        blocked_quantity: decimal(row, mapping, BlockedQuantity, &mut errors),
        pending_buy_quantity: decimal(row, mapping, PendingBuyQuantity, &mut errors),
        pending_sell_quantity: decimal(row, mapping, PendingSellQuantity, &mut errors),
        total_position: decimal(row, mapping, TotalPosition, &mut errors),
        saleable_quantity: decimal(row, mapping, SaleableQuantity, &mut errors),
        parse_errors: errors,
    }
}

pub fn extract_contract_note(row: &[String], mapping: &ResolvedMapping) -> ContractNoteDraft {
    use CanonicalField::*;

    let mut errors = Vec::new();
    ContractNoteDraft {
        ecn_number: text(row, mapping, EcnNumber),
        trade_date: date(row, mapping, TradeDate, &mut errors),
        trade_side: text(row, mapping, TradeSide),
        client_reference: text(row, mapping, ClientReference),
        client_name: text(row, mapping, ClientName),
        instrument_isin: isin(row, mapping),
        instrument_name: text(row, mapping, InstrumentName),
        quantity: decimal(row, mapping, Quantity, &mut errors),
        price: decimal(row, mapping, Price, &mut errors),
        gross_amount: decimal(row, mapping, GrossAmount, &mut errors),
        net_amount: decimal(row, mapping, NetAmount, &mut errors),
        broker_code: text(row, mapping, BrokerCode),
        parse_errors: errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::custodian_profiles::{profile_for, resolve};
    use crate::domain::custodian::DataKind;
    use std::str::FromStr;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_sum_rule_adds_present_columns() {
        let profile = profile_for(SourceSystem::Orbis, DataKind::Custody);
        let headers = strings(&["BOID", "ISIN", "Pledge Qty", "Lockin Qty", "Earmarked Qty", "Total Qty"]);
        let mapping = resolve(profile, &headers);

        let draft = extract_custody(&strings(&["B1", "ine002a01018", "10", "", "2.5", "100"]), &mapping);
        assert_eq!(draft.blocked_quantity, Some(BigDecimal::from_str("12.5").unwrap()));
        assert_eq!(draft.instrument_isin.as_deref(), Some("INE002A01018"));
        assert!(draft.parse_errors.is_empty());

        let none = extract_custody(&strings(&["B1", "ine002a01018", "", "-", ""]), &mapping);
        assert_eq!(none.blocked_quantity, None);
        assert_eq!(none.total_position, None);
    }

    #[test]
    fn test_unparseable_numbers_are_reported() {
        let profile = profile_for(SourceSystem::Hdfc, DataKind::Custody);
        let mapping = resolve(profile, &strings(&["Client Code", "ISIN", "Total Balance"]));
        let draft = extract_custody(&strings(&["C1", "INE002A01018", "lots"]), &mapping);

        assert_eq!(draft.total_position, None);
        assert_eq!(draft.parse_errors.len(), 1);
        assert!(draft.parse_errors[0].starts_with("total_position"));
    }
}
