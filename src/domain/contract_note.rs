use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::custodian::SourceSystem;
use super::custody_record::add_into;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }

    /// Accepts the spellings brokers use in their exports.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "B" | "BUY" | "BOUGHT" | "P" | "PURCHASE" | "PURC" => Some(TradeSide::Buy),
            "S" | "SELL" | "SOLD" | "SALE" => Some(TradeSide::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One trade line of a broker contract note (ECN).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractNote {
    pub ecn_number: String,
    pub trade_date: Option<NaiveDate>,
    pub trade_side: TradeSide,
    pub client_reference: String,
    pub client_name: Option<String>,
    pub instrument_isin: String,
    pub instrument_name: Option<String>,
    pub quantity: BigDecimal,
    pub price: Option<BigDecimal>,
    pub gross_amount: Option<BigDecimal>,
    pub net_amount: Option<BigDecimal>,
    pub broker_code: Option<String>,
    pub amount_mismatch: bool,

    pub source_system: SourceSystem,
    pub file_name: String,
    pub record_date: NaiveDate,
}

impl ContractNote {
    pub fn upsert_key(&self) -> (String, String, String, TradeSide) {
        (
            self.ecn_number.clone(),
            self.client_reference.clone(),
            self.instrument_isin.clone(),
            self.trade_side,
        )
    }

    /// Merges another fill of the same trade key: quantities and amounts add up.
    pub fn absorb(&mut self, other: &ContractNote) {
        self.quantity = &self.quantity + &other.quantity;
        add_into(&mut self.gross_amount, &other.gross_amount);
        add_into(&mut self.net_amount, &other.net_amount);
        self.amount_mismatch |= other.amount_mismatch;
    }
}

#[derive(Debug, Clone)]
pub struct ContractNoteBatch {
    pub source_system: SourceSystem,
    pub record_date: NaiveDate,
    pub file_name: String,
    pub table: String,
    pub notes: Vec<ContractNote>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_side_parse() {
        assert_eq!(TradeSide::parse(" b "), Some(TradeSide::Buy));
        assert_eq!(TradeSide::parse("Purchase"), Some(TradeSide::Buy));
        assert_eq!(TradeSide::parse("SOLD"), Some(TradeSide::Sell));
        assert_eq!(TradeSide::parse("hold"), None);
    }
}
