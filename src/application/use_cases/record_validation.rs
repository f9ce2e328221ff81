use bigdecimal::{BigDecimal, Zero};
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

use crate::application::use_cases::record_normalizer::{ContractNoteDraft, CustodyDraft, RowContext};
use crate::domain::contract_note::{ContractNote, TradeSide};
use crate::domain::custody_record::UnifiedCustodyRecord;

static ISIN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{2}[A-Z0-9]{9}[0-9]$").unwrap());

#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Percent of |total - blocked| saleable may deviate by.
    pub balance_tolerance_pct: BigDecimal,
    pub strict_balance_check: bool,
}

impl ValidationOptions {
    pub fn new(balance_tolerance_pct: f64, strict_balance_check: bool) -> Self {
        let tolerance = BigDecimal::from_str(&balance_tolerance_pct.to_string())
            .unwrap_or_else(|_| BigDecimal::from(1));
        Self {
            balance_tolerance_pct: tolerance,
            strict_balance_check,
        }
    }
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self::new(1.0, false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome<T> {
    Accepted { record: T, warnings: Vec<String> },
    Rejected(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsinCheck {
    Valid,
    /// Well-formed but the final digit does not match.
    BadCheckDigit,
    Malformed,
}

pub fn check_isin(isin: &str) -> IsinCheck {
    if !ISIN_PATTERN.is_match(isin) {
        return IsinCheck::Malformed;
    }
    if luhn_valid(isin) {
        IsinCheck::Valid
    } else {
        IsinCheck::BadCheckDigit
    }
}

/// Luhn over the string with letters expanded to two digits (A=10 .. Z=35).
fn luhn_valid(isin: &str) -> bool {
    let expanded: Vec<u32> = isin
        .chars()
        .filter_map(|c| c.to_digit(36))
        .flat_map(|v| {
            if v >= 10 {
                vec![v / 10, v % 10]
            } else {
                vec![v]
            }
        })
        .collect();

    let sum: u32 = expanded
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                *d
            }
        })
        .sum();
    sum % 10 == 0
}

/// `|actual - expected| <= pct% * |expected|`; exact when expected is zero.
pub fn within_tolerance(actual: &BigDecimal, expected: &BigDecimal, tolerance_pct: &BigDecimal) -> bool {
    if expected.is_zero() {
        return actual.is_zero();
    }
    let diff = (actual - expected).abs();
    let allowed = expected.abs() * tolerance_pct / BigDecimal::from(100);
    diff <= allowed
}

fn missing_required(fields: &[(&str, bool)]) -> Option<Vec<String>> {
    let missing: Vec<&str> = fields.iter().filter(|(_, present)| !present).map(|(name, _)| *name).collect();
    if missing.is_empty() {
        None
    } else if missing.len() == fields.len() {
        Some(vec!["all required fields are blank".to_string()])
    } else {
        Some(vec![format!("missing {}", missing.join(", "))])
    }
}

fn isin_issue(isin: &str, reasons: &mut Vec<String>, warnings: &mut Vec<String>) {
    match check_isin(isin) {
        IsinCheck::Valid => {}
        IsinCheck::BadCheckDigit => warnings.push(format!("ISIN {} fails its check digit", isin)),
        IsinCheck::Malformed => reasons.push(format!("invalid ISIN '{}'", isin)),
    }
}

pub fn validate_custody(
    draft: CustodyDraft,
    ctx: &RowContext<'_>,
    options: &ValidationOptions,
) -> RowOutcome<UnifiedCustodyRecord> {
    if let Some(reasons) = missing_required(&[
        ("client_reference", draft.client_reference.is_some()),
        ("instrument_isin", draft.instrument_isin.is_some()),
    ]) {
        return RowOutcome::Rejected(reasons);
    }

    let mut reasons = draft.parse_errors.clone();
    let mut warnings = Vec::new();

    let client_reference = draft.client_reference.unwrap_or_default();
    let instrument_isin = draft.instrument_isin.unwrap_or_default();
    isin_issue(&instrument_isin, &mut reasons, &mut warnings);

    let zero = BigDecimal::zero();
    for (name, value) in [
        ("blocked_quantity", &draft.blocked_quantity),
        ("pending_buy_quantity", &draft.pending_buy_quantity),
        ("pending_sell_quantity", &draft.pending_sell_quantity),
        ("total_position", &draft.total_position),
        ("saleable_quantity", &draft.saleable_quantity),
    ] {
        if matches!(value, Some(v) if v < &zero) {
            warnings.push(format!("negative {}", name));
        }
    }

    let mut saleable_quantity = draft.saleable_quantity;
    let mut saleable_derived = false;
    let mut balance_mismatch = false;

    if let Some(total) = &draft.total_position {
        let blocked = draft.blocked_quantity.clone().unwrap_or_else(BigDecimal::zero);
        let expected = total - &blocked;
        match &saleable_quantity {
            Some(saleable) => {
                if !within_tolerance(saleable, &expected, &options.balance_tolerance_pct) {
                    let message = format!(
                        "saleable {} differs from total - blocked {} beyond {}%",
                        saleable, expected, options.balance_tolerance_pct
                    );
                    if options.strict_balance_check {
                        reasons.push(message);
                    } else {
                        warnings.push(message);
                        balance_mismatch = true;
                    }
                }
            }
            None => {
                saleable_quantity = Some(expected);
                saleable_derived = true;
            }
        }
    }

    if !reasons.is_empty() {
        return RowOutcome::Rejected(reasons);
    }

    RowOutcome::Accepted {
        record: UnifiedCustodyRecord {
            client_reference,
            client_name: draft.client_name,
            instrument_isin,
            instrument_name: draft.instrument_name,
            instrument_code: draft.instrument_code,
            blocked_quantity: draft.blocked_quantity,
            pending_buy_quantity: draft.pending_buy_quantity,
            pending_sell_quantity: draft.pending_sell_quantity,
            total_position: draft.total_position,
            saleable_quantity,
            saleable_derived,
            balance_mismatch,
            source_system: ctx.source_system,
            file_name: ctx.file_name.to_string(),
            record_date: ctx.record_date,
        },
        warnings,
    }
}

pub fn validate_contract_note(
    draft: ContractNoteDraft,
    ctx: &RowContext<'_>,
    options: &ValidationOptions,
) -> RowOutcome<ContractNote> {
    if let Some(reasons) = missing_required(&[
        ("ecn_number", draft.ecn_number.is_some()),
        ("trade_side", draft.trade_side.is_some()),
        ("client_reference", draft.client_reference.is_some()),
        ("instrument_isin", draft.instrument_isin.is_some()),
        ("quantity", draft.quantity.is_some()),
    ]) {
        return RowOutcome::Rejected(reasons);
    }

    let mut reasons = draft.parse_errors.clone();
    let mut warnings = Vec::new();

    let instrument_isin = draft.instrument_isin.unwrap_or_default();
    isin_issue(&instrument_isin, &mut reasons, &mut warnings);

    let raw_side = draft.trade_side.unwrap_or_default();
    let trade_side = TradeSide::parse(&raw_side);
    if trade_side.is_none() {
        reasons.push(format!("unrecognised trade side '{}'", raw_side));
    }

    let quantity = draft.quantity.unwrap_or_else(BigDecimal::zero);
    if quantity <= BigDecimal::zero() {
        reasons.push(format!("quantity must be positive, got {}", quantity));
    }

    let mut amount_mismatch = false;
    if let (Some(price), Some(gross)) = (&draft.price, &draft.gross_amount) {
        let expected = &quantity * price;
        if !within_tolerance(gross, &expected, &options.balance_tolerance_pct) {
            warnings.push(format!(
                "gross amount {} differs from quantity x price {}",
                gross, expected
            ));
            amount_mismatch = true;
        }
    }

    let trade_side = match (trade_side, reasons.is_empty()) {
        (Some(side), true) => side,
        _ => return RowOutcome::Rejected(reasons),
    };

    RowOutcome::Accepted {
        record: ContractNote {
            ecn_number: draft.ecn_number.unwrap_or_default(),
            trade_date: draft.trade_date,
            trade_side,
            client_reference: draft.client_reference.unwrap_or_default(),
            client_name: draft.client_name,
            instrument_isin,
            instrument_name: draft.instrument_name,
            quantity,
            price: draft.price,
            gross_amount: draft.gross_amount,
            net_amount: draft.net_amount,
            broker_code: draft.broker_code,
            amount_mismatch,
            source_system: ctx.source_system,
            file_name: ctx.file_name.to_string(),
            record_date: ctx.record_date,
        },
        warnings,
    }
}
