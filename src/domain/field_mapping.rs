// ============================================================
// FIELD MAPPING TYPES
// ============================================================
// Per-custodian configuration: which source columns feed which canonical field

use serde::Serialize;

use super::custodian::{DataKind, SourceSystem};

/// Field of the unified schemas a source column can be mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    ClientReference,
    ClientName,
    InstrumentIsin,
    InstrumentName,
    InstrumentCode,
    BlockedQuantity,
    PendingBuyQuantity,
    PendingSellQuantity,
    TotalPosition,
    SaleableQuantity,

    EcnNumber,
    TradeDate,
    TradeSide,
    Quantity,
    Price,
    GrossAmount,
    NetAmount,
    BrokerCode,
}

impl CanonicalField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::ClientReference => "client_reference",
            CanonicalField::ClientName => "client_name",
            CanonicalField::InstrumentIsin => "instrument_isin",
            CanonicalField::InstrumentName => "instrument_name",
            CanonicalField::InstrumentCode => "instrument_code",
            CanonicalField::BlockedQuantity => "blocked_quantity",
            CanonicalField::PendingBuyQuantity => "pending_buy_quantity",
            CanonicalField::PendingSellQuantity => "pending_sell_quantity",
            CanonicalField::TotalPosition => "total_position",
            CanonicalField::SaleableQuantity => "saleable_quantity",
            CanonicalField::EcnNumber => "ecn_number",
            CanonicalField::TradeDate => "trade_date",
            CanonicalField::TradeSide => "trade_side",
            CanonicalField::Quantity => "quantity",
            CanonicalField::Price => "price",
            CanonicalField::GrossAmount => "gross_amount",
            CanonicalField::NetAmount => "net_amount",
            CanonicalField::BrokerCode => "broker_code",
        }
    }
}

/// How a canonical field is obtained from the source columns.
///
/// Aliases are matched against normalized headers (lowercase, separators collapsed to
/// `_`) and tried in order, so list the most specific spelling first.
#[derive(Debug, Clone, Copy)]
pub enum FieldRule {
    /// First header matching any alias.
    Column(&'static [&'static str]),
    /// Sum of every group that resolves to a header; each group is an alias list.
    SumOf(&'static [&'static [&'static str]]),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub field: CanonicalField,
    pub rule: FieldRule,
}

impl FieldMapping {
    pub const fn column(field: CanonicalField, aliases: &'static [&'static str]) -> Self {
        Self {
            field,
            rule: FieldRule::Column(aliases),
        }
    }

    pub const fn sum_of(field: CanonicalField, groups: &'static [&'static [&'static str]]) -> Self {
        Self {
            field,
            rule: FieldRule::SumOf(groups),
        }
    }
}

/// Layout of one custodian export.
#[derive(Debug, Clone, Copy)]
pub struct CustodianProfile {
    pub source_system: SourceSystem,
    pub data_kind: DataKind,
    /// Workbook sheet holding the data; first sheet when absent.
    pub sheet_name: Option<&'static str>,
    /// Zero-based row of the header line; auto-detected when absent.
    pub header_row: Option<usize>,
    /// Headers distinctive enough to recognise the layout without a file name hint.
    pub signature_headers: &'static [&'static str],
    pub mappings: &'static [FieldMapping],
}

impl CustodianProfile {
    /// Every alias of every rule, used to score candidate header rows.
    pub fn all_aliases(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.mappings.iter().flat_map(|m| -> Box<dyn Iterator<Item = &'static str>> {
            match m.rule {
                FieldRule::Column(aliases) => Box::new(aliases.iter().copied()),
                FieldRule::SumOf(groups) => Box::new(groups.iter().flat_map(|g| g.iter().copied())),
            }
        })
    }
}

/// Alias match against a normalized header:
/// 1) exact match
/// 2) ends_with("_alias") or starts_with("alias_")
/// 3) contains("_alias_")
pub fn header_matches_alias(normalized_header: &str, alias: &str) -> bool {
    if normalized_header == alias {
        return true;
    }
    if normalized_header.ends_with(&format!("_{}", alias)) {
        return true;
    }
    if normalized_header.starts_with(&format!("{}_", alias)) {
        return true;
    }
    normalized_header.contains(&format!("_{}_", alias))
}
