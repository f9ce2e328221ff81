// ============================================================
// RAW SHEET TYPES
// ============================================================
// Header line plus data rows, all cells kept as trimmed strings

use serde::{Deserialize, Serialize};

/// Every row of a sheet, blank ones included, before the header line is known.
pub type Grid = Vec<Vec<String>>;

/// Sheet split at its header line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSheet {
    /// Header cells as written in the file.
    pub headers: Vec<String>,

    /// Data rows below the header, blank spacer rows included.
    pub rows: Vec<Vec<String>>,

    /// Zero-based grid row the header was taken from.
    pub header_row: usize,
}

impl RawSheet {
    /// Split a grid at `header_row`; rows above it are titles or banners and are dropped.
    pub fn from_grid(grid: &[Vec<String>], header_row: usize) -> Self {
        let headers = grid.get(header_row).cloned().unwrap_or_default();
        let rows = grid
            .iter()
            .skip(header_row + 1)
            .cloned()
            .collect();

        Self {
            headers,
            rows,
            header_row,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to one `_`.
/// "Free Bal. (Qty)" becomes "free_bal_qty".
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect::<String>()
        .split('_')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Trim and collapse inner whitespace; spreadsheets love non-breaking spaces.
pub fn clean_cell(value: &str) -> String {
    value
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
