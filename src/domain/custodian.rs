use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::AppError;

/// Back-office system a file was exported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceSystem {
    Hdfc,
    Axis,
    Kotak,
    Orbis,
    Deutsche,
    TrustPms,
    /// Files whose layout is matched with the generic alias table.
    Generic,
}

impl SourceSystem {
    pub const ALL: [SourceSystem; 7] = [
        SourceSystem::Hdfc,
        SourceSystem::Axis,
        SourceSystem::Kotak,
        SourceSystem::Orbis,
        SourceSystem::Deutsche,
        SourceSystem::TrustPms,
        SourceSystem::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Hdfc => "HDFC",
            SourceSystem::Axis => "AXIS",
            SourceSystem::Kotak => "KOTAK",
            SourceSystem::Orbis => "ORBIS",
            SourceSystem::Deutsche => "DEUTSCHE",
            SourceSystem::TrustPms => "TRUSTPMS",
            SourceSystem::Generic => "GENERIC",
        }
    }

    /// Lowercase form used in collection names.
    pub fn slug(&self) -> &'static str {
        match self {
            SourceSystem::Hdfc => "hdfc",
            SourceSystem::Axis => "axis",
            SourceSystem::Kotak => "kotak",
            SourceSystem::Orbis => "orbis",
            SourceSystem::Deutsche => "deutsche",
            SourceSystem::TrustPms => "trustpms",
            SourceSystem::Generic => "generic",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "");
        SourceSystem::ALL
            .iter()
            .copied()
            .find(|source| source.slug() == key)
            .ok_or_else(|| AppError::ValidationError(format!("Unknown source system: {}", s)))
    }
}

/// What a file contains, which decides the canonical record shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// End-of-day holdings per client and instrument.
    Custody,
    /// Broker trade confirmations (contract notes / ECN).
    Transactions,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Custody => "custody",
            DataKind::Transactions => "transactions",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "custody" | "holdings" => Ok(DataKind::Custody),
            "transactions" | "transaction" | "contract_notes" | "ecn" => Ok(DataKind::Transactions),
            other => Err(AppError::ValidationError(format!("Unknown data kind: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_system_from_str() {
        assert_eq!("hdfc".parse::<SourceSystem>().unwrap(), SourceSystem::Hdfc);
        assert_eq!("Trust_PMS".parse::<SourceSystem>().unwrap(), SourceSystem::TrustPms);
        assert!("citi".parse::<SourceSystem>().is_err());
    }

    #[test]
    fn test_data_kind_round_trip_names() {
        assert_eq!(DataKind::Custody.as_str(), "custody");
        assert_eq!("ECN".parse::<DataKind>().unwrap(), DataKind::Transactions);
    }
}
