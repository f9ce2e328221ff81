// Per-custodian header configuration for custody and contract-note files.
//
// Aliases are matched against normalized headers (see `normalize_header`):
//   1) exact match, across every field first
//   2) boundary match: ends_with("_alias"), starts_with("alias_"), contains("_alias_")
// A column is never assigned to two fields.

use std::collections::{HashMap, HashSet};

use crate::domain::custodian::{DataKind, SourceSystem};
use crate::domain::error::{AppError, Result};
use crate::domain::field_mapping::{
    header_matches_alias, CanonicalField, CustodianProfile, FieldMapping, FieldRule,
};
use crate::domain::sheet::normalize_header;

use CanonicalField::*;

// Shared alias lists. Most specific spelling first.
const CLIENT_REFERENCE: &[&str] = &[
    "client_code",
    "client_id",
    "client_ref",
    "client_reference",
    "account_code",
    "account_no",
    "account_number",
    "ucc",
    "boid",
];
const CLIENT_NAME: &[&str] = &["client_name", "account_name", "holder_name", "investor_name"];
const ISIN: &[&str] = &["isin", "isin_code", "isin_no", "security_isin"];
const INSTRUMENT_NAME: &[&str] = &[
    "security_name",
    "scrip_name",
    "instrument_name",
    "company_name",
    "security_description",
];
const INSTRUMENT_CODE: &[&str] = &["scrip_code", "security_code", "symbol", "instrument_code"];
const BLOCKED: &[&str] = &[
    "blocked_qty",
    "blocked_quantity",
    "pledged_qty",
    "pledge_qty",
    "lock_in_qty",
    "locked_qty",
    "blocked",
];
const PENDING_BUY: &[&str] = &[
    "pending_buy_qty",
    "pending_purchase",
    "pending_receipt",
    "receivable_qty",
];
const PENDING_SELL: &[&str] = &[
    "pending_sell_qty",
    "pending_sale",
    "pending_delivery",
    "deliverable_qty",
];
const SALEABLE: &[&str] = &[
    "saleable_qty",
    "saleable_quantity",
    "free_qty",
    "free_balance",
    "free_bal",
    "available_qty",
];
const TOTAL: &[&str] = &[
    "total_qty",
    "total_position",
    "total_holding",
    "holding_qty",
    "total_balance",
    "net_position",
];

const ECN_NUMBER: &[&str] = &[
    "ecn_no",
    "ecn_number",
    "contract_note_no",
    "contract_no",
    "cn_no",
    "trade_no",
];
const TRADE_DATE: &[&str] = &["trade_date", "deal_date", "transaction_date", "txn_date"];
const TRADE_SIDE: &[&str] = &["buy_sell", "b_s", "trade_type", "transaction_type", "side"];
const QUANTITY: &[&str] = &["trade_qty", "quantity", "qty", "traded_qty"];
const PRICE: &[&str] = &["trade_price", "rate", "price", "avg_price"];
const GROSS_AMOUNT: &[&str] = &["gross_amount", "gross_value", "trade_value", "gross_amt"];
const NET_AMOUNT: &[&str] = &["net_amount", "net_value", "net_amt", "settlement_amount"];
const BROKER_CODE: &[&str] = &["broker_code", "broker_id", "broker", "member_code"];

// ============================================================
// CUSTODY PROFILES
// ============================================================

static HDFC_CUSTODY: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Hdfc,
    data_kind: DataKind::Custody,
    sheet_name: None,
    header_row: None,
    // Column names overlap the generic aliases; only the file name identifies HDFC.
    signature_headers: &[],
    mappings: &[
        FieldMapping::column(ClientReference, CLIENT_REFERENCE),
        FieldMapping::column(ClientName, CLIENT_NAME),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, INSTRUMENT_NAME),
        FieldMapping::column(InstrumentCode, INSTRUMENT_CODE),
        FieldMapping::column(BlockedQuantity, &["pledged_qty", "blocked_qty"]),
        FieldMapping::column(PendingBuyQuantity, PENDING_BUY),
        FieldMapping::column(PendingSellQuantity, PENDING_SELL),
        FieldMapping::column(SaleableQuantity, &["free_balance", "free_qty"]),
        FieldMapping::column(TotalPosition, &["total_balance", "total_qty"]),
    ],
};

static AXIS_CUSTODY: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Axis,
    data_kind: DataKind::Custody,
    sheet_name: None,
    header_row: None,
    signature_headers: &[],
    mappings: &[
        FieldMapping::column(ClientReference, &["account_no", "client_code"]),
        FieldMapping::column(ClientName, CLIENT_NAME),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, INSTRUMENT_NAME),
        FieldMapping::column(InstrumentCode, INSTRUMENT_CODE),
        FieldMapping::sum_of(BlockedQuantity, &[&["lock_in_qty"], &["pledged_qty", "pledge_qty"]]),
        FieldMapping::column(PendingBuyQuantity, PENDING_BUY),
        FieldMapping::column(PendingSellQuantity, PENDING_SELL),
        FieldMapping::column(SaleableQuantity, &["saleable_qty", "free_qty"]),
        FieldMapping::column(TotalPosition, &["holding_qty", "total_qty"]),
    ],
};

static KOTAK_CUSTODY: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Kotak,
    data_kind: DataKind::Custody,
    sheet_name: None,
    header_row: None,
    signature_headers: &[],
    mappings: &[
        FieldMapping::column(ClientReference, &["ucc", "client_code"]),
        FieldMapping::column(ClientName, CLIENT_NAME),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, &["scrip_name", "security_name"]),
        FieldMapping::column(InstrumentCode, INSTRUMENT_CODE),
        FieldMapping::column(BlockedQuantity, BLOCKED),
        FieldMapping::column(PendingBuyQuantity, PENDING_BUY),
        FieldMapping::column(PendingSellQuantity, PENDING_SELL),
        FieldMapping::column(SaleableQuantity, &["available_qty", "saleable_qty"]),
        FieldMapping::column(TotalPosition, &["net_position", "total_qty"]),
    ],
};

// Orbis exports a formatted workbook: three banner rows above the header on "Holdings".
static ORBIS_CUSTODY: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Orbis,
    data_kind: DataKind::Custody,
    sheet_name: Some("Holdings"),
    header_row: Some(3),
    signature_headers: &["earmarked_qty", "lockin_qty"],
    mappings: &[
        FieldMapping::column(ClientReference, &["boid", "client_code"]),
        FieldMapping::column(ClientName, CLIENT_NAME),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, INSTRUMENT_NAME),
        FieldMapping::column(InstrumentCode, INSTRUMENT_CODE),
        FieldMapping::sum_of(
            BlockedQuantity,
            &[&["pledge_qty"], &["lockin_qty", "lock_in_qty"], &["earmarked_qty"]],
        ),
        FieldMapping::column(PendingBuyQuantity, PENDING_BUY),
        FieldMapping::column(PendingSellQuantity, PENDING_SELL),
        FieldMapping::column(SaleableQuantity, &["free_qty", "saleable_qty"]),
        FieldMapping::column(TotalPosition, &["total_qty", "total_holding"]),
    ],
};

// Deutsche files carry no saleable column; it is derived downstream.
static DEUTSCHE_CUSTODY: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Deutsche,
    data_kind: DataKind::Custody,
    sheet_name: None,
    header_row: None,
    signature_headers: &["safekeeping_account", "settled_position", "blocked_position"],
    mappings: &[
        FieldMapping::column(ClientReference, &["safekeeping_account", "account_number"]),
        FieldMapping::column(ClientName, &["account_name", "client_name"]),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, &["security_description", "security_name"]),
        FieldMapping::column(InstrumentCode, &["local_code", "security_code"]),
        FieldMapping::sum_of(
            BlockedQuantity,
            &[&["blocked_position", "blocked_qty"], &["pledged_position", "pledged_qty"]],
        ),
        FieldMapping::column(PendingBuyQuantity, &["pending_receipts", "pending_receipt"]),
        FieldMapping::column(PendingSellQuantity, &["pending_deliveries", "pending_delivery"]),
        FieldMapping::column(TotalPosition, &["settled_position", "total_position"]),
    ],
};

static TRUSTPMS_CUSTODY: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::TrustPms,
    data_kind: DataKind::Custody,
    sheet_name: None,
    header_row: None,
    signature_headers: &["portfolio_code", "free_stock", "blocked_stock", "closing_stock"],
    mappings: &[
        FieldMapping::column(ClientReference, &["portfolio_code", "client_code"]),
        FieldMapping::column(ClientName, &["portfolio_name", "client_name"]),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, &["stock_name", "security_name"]),
        FieldMapping::column(InstrumentCode, &["stock_code", "security_code"]),
        FieldMapping::column(BlockedQuantity, &["blocked_stock", "blocked_qty"]),
        FieldMapping::column(PendingBuyQuantity, &["purchase_pending", "pending_purchase"]),
        FieldMapping::column(PendingSellQuantity, &["sale_pending", "pending_sale"]),
        FieldMapping::column(SaleableQuantity, &["free_stock", "saleable_qty"]),
        FieldMapping::column(TotalPosition, &["closing_stock", "total_qty"]),
    ],
};

static GENERIC_CUSTODY: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Generic,
    data_kind: DataKind::Custody,
    sheet_name: None,
    header_row: None,
    // Balance columns only show up in holdings files.
    signature_headers: &[
        "free_qty",
        "free_balance",
        "saleable_qty",
        "available_qty",
        "total_qty",
        "total_balance",
        "total_holding",
        "holding_qty",
        "net_position",
    ],
    mappings: &[
        FieldMapping::column(ClientReference, CLIENT_REFERENCE),
        FieldMapping::column(ClientName, CLIENT_NAME),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, INSTRUMENT_NAME),
        FieldMapping::column(InstrumentCode, INSTRUMENT_CODE),
        FieldMapping::column(BlockedQuantity, BLOCKED),
        FieldMapping::column(PendingBuyQuantity, PENDING_BUY),
        FieldMapping::column(PendingSellQuantity, PENDING_SELL),
        FieldMapping::column(SaleableQuantity, SALEABLE),
        FieldMapping::column(TotalPosition, TOTAL),
    ],
};

// ============================================================
// CONTRACT NOTE PROFILES
// ============================================================

static GENERIC_CONTRACT_NOTES: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Generic,
    data_kind: DataKind::Transactions,
    sheet_name: None,
    header_row: None,
    signature_headers: &["ecn_no", "contract_note_no", "buy_sell", "trade_date", "trade_price"],
    mappings: &[
        FieldMapping::column(EcnNumber, ECN_NUMBER),
        FieldMapping::column(TradeDate, TRADE_DATE),
        FieldMapping::column(TradeSide, TRADE_SIDE),
        FieldMapping::column(ClientReference, CLIENT_REFERENCE),
        FieldMapping::column(ClientName, CLIENT_NAME),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, INSTRUMENT_NAME),
        FieldMapping::column(GrossAmount, GROSS_AMOUNT),
        FieldMapping::column(NetAmount, NET_AMOUNT),
        FieldMapping::column(Price, PRICE),
        FieldMapping::column(Quantity, QUANTITY),
        FieldMapping::column(BrokerCode, BROKER_CODE),
    ],
};

static KOTAK_CONTRACT_NOTES: CustodianProfile = CustodianProfile {
    source_system: SourceSystem::Kotak,
    data_kind: DataKind::Transactions,
    sheet_name: None,
    header_row: None,
    signature_headers: &[],
    mappings: &[
        FieldMapping::column(EcnNumber, &["ecn_no", "contract_no"]),
        FieldMapping::column(TradeDate, TRADE_DATE),
        FieldMapping::column(TradeSide, &["b_s", "buy_sell"]),
        FieldMapping::column(ClientReference, &["ucc", "client_code"]),
        FieldMapping::column(ClientName, CLIENT_NAME),
        FieldMapping::column(InstrumentIsin, ISIN),
        FieldMapping::column(InstrumentName, &["scrip_name", "security_name"]),
        FieldMapping::column(Price, &["net_rate", "trade_price", "rate"]),
        FieldMapping::column(GrossAmount, GROSS_AMOUNT),
        FieldMapping::column(NetAmount, NET_AMOUNT),
        FieldMapping::column(Quantity, &["traded_qty", "quantity"]),
        FieldMapping::column(BrokerCode, BROKER_CODE),
    ],
};

pub static PROFILES: &[&CustodianProfile] = &[
    &HDFC_CUSTODY,
    &AXIS_CUSTODY,
    &KOTAK_CUSTODY,
    &ORBIS_CUSTODY,
    &DEUTSCHE_CUSTODY,
    &TRUSTPMS_CUSTODY,
    &KOTAK_CONTRACT_NOTES,
    &GENERIC_CUSTODY,
    &GENERIC_CONTRACT_NOTES,
];

/// Exact profile for the pair, else the generic profile of that kind.
pub fn profile_for(source: SourceSystem, kind: DataKind) -> &'static CustodianProfile {
    PROFILES
        .iter()
        .copied()
        .find(|p| p.source_system == source && p.data_kind == kind)
        .unwrap_or_else(|| generic_profile(kind))
}

pub fn required_fields(kind: DataKind) -> &'static [CanonicalField] {
    match kind {
        DataKind::Custody => &[ClientReference, InstrumentIsin],
        DataKind::Transactions => &[EcnNumber, TradeSide, ClientReference, InstrumentIsin, Quantity],
    }
}

/// Aliases of every profile, for locating a header before the layout is known.
pub fn all_profile_aliases() -> Vec<&'static str> {
    let mut aliases: Vec<&'static str> = PROFILES.iter().flat_map(|p| p.all_aliases()).collect();
    aliases.sort_unstable();
    aliases.dedup();
    aliases
}

/// Minimum signature hits before a header row identifies a profile.
const MIN_SIGNATURE_HITS: usize = 2;

fn generic_profile(kind: DataKind) -> &'static CustodianProfile {
    match kind {
        DataKind::Custody => &GENERIC_CUSTODY,
        DataKind::Transactions => &GENERIC_CONTRACT_NOTES,
    }
}

/// Signature headers present in `normalized`. A custodian profile only scores on
/// headers the generic profile of its kind does not also know.
fn signature_hits(profile: &CustodianProfile, normalized: &[String]) -> usize {
    let generic = generic_profile(profile.data_kind);
    profile
        .signature_headers
        .iter()
        .filter(|sig| {
            profile.source_system == SourceSystem::Generic
                || !generic.all_aliases().any(|alias| alias == **sig)
        })
        .filter(|sig| normalized.iter().any(|h| header_matches_alias(h, sig)))
        .count()
}

/// Best profile by signature header hits, when the file name gave nothing away.
/// Custodian-specific profiles win over the generic ones.
pub fn detect_from_headers(headers: &[String]) -> Option<&'static CustodianProfile> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();

    let best_of = |generic: bool| {
        let mut best: Option<(&'static CustodianProfile, usize)> = None;
        for profile in PROFILES.iter().copied() {
            if (profile.source_system == SourceSystem::Generic) != generic {
                continue;
            }
            let hits = signature_hits(profile, &normalized);
            if hits < MIN_SIGNATURE_HITS {
                continue;
            }
            // Strictly greater keeps the earlier profile on ties.
            if best.map_or(true, |(_, top)| hits > top) {
                best = Some((profile, hits));
            }
        }
        best.map(|(profile, _)| profile)
    };

    best_of(false).or_else(|| best_of(true))
}

// ============================================================
// HEADER RESOLUTION
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedColumn {
    Single(usize),
    /// Present columns of a `SumOf` rule; absent groups are skipped.
    Sum(Vec<usize>),
}

#[derive(Debug, Clone, Default)]
pub struct ResolvedMapping {
    columns: HashMap<CanonicalField, ResolvedColumn>,
}

impl ResolvedMapping {
    pub fn get(&self, field: CanonicalField) -> Option<&ResolvedColumn> {
        self.columns.get(&field)
    }

    pub fn is_mapped(&self, field: CanonicalField) -> bool {
        self.columns.contains_key(&field)
    }

    /// Fails the whole collection when a required field has no column.
    pub fn ensure_required(&self, kind: DataKind) -> Result<()> {
        let missing: Vec<&str> = required_fields(kind)
            .iter()
            .filter(|f| !self.is_mapped(**f))
            .map(|f| f.as_str())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationError(format!(
                "No column found for required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

/// Map the profile's canonical fields onto header indices.
pub fn resolve(profile: &CustodianProfile, headers: &[String]) -> ResolvedMapping {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let mut used: HashSet<usize> = HashSet::new();

    // Every alias group of every rule, in profile order: (mapping index, group index, aliases).
    let mut groups: Vec<(usize, usize, &[&str])> = Vec::new();
    for (mi, mapping) in profile.mappings.iter().enumerate() {
        match mapping.rule {
            FieldRule::Column(aliases) => groups.push((mi, 0, aliases)),
            FieldRule::SumOf(sum_groups) => {
                for (gi, aliases) in sum_groups.iter().enumerate() {
                    groups.push((mi, gi, aliases));
                }
            }
        }
    }

    let mut found: HashMap<(usize, usize), usize> = HashMap::new();
    let passes: [fn(&str, &str) -> bool; 2] = [|h, a| h == a, header_matches_alias];
    for matcher in passes {
        for (mi, gi, aliases) in &groups {
            if found.contains_key(&(*mi, *gi)) {
                continue;
            }
            let hit = aliases.iter().find_map(|alias| {
                normalized
                    .iter()
                    .enumerate()
                    .find(|(idx, h)| !used.contains(idx) && matcher(h, alias))
                    .map(|(idx, _)| idx)
            });
            if let Some(idx) = hit {
                used.insert(idx);
                found.insert((*mi, *gi), idx);
            }
        }
    }

    let mut columns = HashMap::new();
    for (mi, mapping) in profile.mappings.iter().enumerate() {
        match mapping.rule {
            FieldRule::Column(_) => {
                if let Some(idx) = found.get(&(mi, 0)) {
                    columns.insert(mapping.field, ResolvedColumn::Single(*idx));
                }
            }
            FieldRule::SumOf(sum_groups) => {
                let indices: Vec<usize> = (0..sum_groups.len())
                    .filter_map(|gi| found.get(&(mi, gi)).copied())
                    .collect();
                if !indices.is_empty() {
                    columns.insert(mapping.field, ResolvedColumn::Sum(indices));
                }
            }
        }
    }

    ResolvedMapping { columns }
}
