use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::custodian::SourceSystem;

/// One holding line after mapping a custodian file onto the unified schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedCustodyRecord {
    pub client_reference: String,
    pub client_name: Option<String>,

    pub instrument_isin: String,
    pub instrument_name: Option<String>,
    pub instrument_code: Option<String>,

    pub blocked_quantity: Option<BigDecimal>,
    pub pending_buy_quantity: Option<BigDecimal>,
    pub pending_sell_quantity: Option<BigDecimal>,
    pub total_position: Option<BigDecimal>,
    pub saleable_quantity: Option<BigDecimal>,

    /// Saleable was computed as total - blocked.
    pub saleable_derived: bool,
    /// Saleable disagrees with total - blocked beyond the tolerance.
    pub balance_mismatch: bool,

    pub source_system: SourceSystem,
    pub file_name: String,
    pub record_date: NaiveDate,
}

impl UnifiedCustodyRecord {
    /// Upsert key within one (source_system, record_date) snapshot.
    pub fn snapshot_key(&self) -> (String, String) {
        (self.client_reference.clone(), self.instrument_isin.clone())
    }

    /// Adds the balances of a duplicate line for the same client and instrument.
    pub fn absorb(&mut self, other: &UnifiedCustodyRecord) {
        add_into(&mut self.blocked_quantity, &other.blocked_quantity);
        add_into(&mut self.pending_buy_quantity, &other.pending_buy_quantity);
        add_into(&mut self.pending_sell_quantity, &other.pending_sell_quantity);
        add_into(&mut self.total_position, &other.total_position);
        add_into(&mut self.saleable_quantity, &other.saleable_quantity);
        self.saleable_derived |= other.saleable_derived;
        self.balance_mismatch |= other.balance_mismatch;
        if self.client_name.is_none() {
            self.client_name = other.client_name.clone();
        }
        if self.instrument_name.is_none() {
            self.instrument_name = other.instrument_name.clone();
        }
        if self.instrument_code.is_none() {
            self.instrument_code = other.instrument_code.clone();
        }
    }
}

pub(crate) fn add_into(target: &mut Option<BigDecimal>, other: &Option<BigDecimal>) {
    if let Some(extra) = other {
        *target = Some(match target.take() {
            Some(value) => value + extra,
            None => extra.clone(),
        });
    }
}

/// All accepted custody lines of one file, replacing the previous snapshot.
#[derive(Debug, Clone)]
pub struct CustodySnapshot {
    pub source_system: SourceSystem,
    pub record_date: NaiveDate,
    pub file_name: String,
    pub master_table: String,
    pub shadow_table: String,
    pub records: Vec<UnifiedCustodyRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Option<BigDecimal> {
        Some(BigDecimal::from_str(s).unwrap())
    }

    fn record(total: &str, saleable: Option<&str>) -> UnifiedCustodyRecord {
        UnifiedCustodyRecord {
            client_reference: "C001".to_string(),
            client_name: None,
            instrument_isin: "INE002A01018".to_string(),
            instrument_name: Some("RELIANCE".to_string()),
            instrument_code: None,
            blocked_quantity: None,
            pending_buy_quantity: None,
            pending_sell_quantity: None,
            total_position: dec(total),
            saleable_quantity: saleable.and_then(dec),
            saleable_derived: false,
            balance_mismatch: false,
            source_system: SourceSystem::Hdfc,
            file_name: "hdfc.csv".to_string(),
            record_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        }
    }

    #[test]
    fn test_absorb_sums_present_balances() {
        let mut first = record("100", Some("90"));
        let mut second = record("50", None);
        second.client_name = Some("Asha".to_string());
        first.absorb(&second);

        assert_eq!(first.total_position, dec("150"));
        assert_eq!(first.saleable_quantity, dec("90"));
        assert_eq!(first.client_name.as_deref(), Some("Asha"));
    }
}
