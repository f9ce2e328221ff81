// ============================================================
// HEADER LOCATOR
// ============================================================
// Find the header line of a grid: exports often carry title banners,
// report dates or blank spacer rows above the column names

use crate::domain::field_mapping::header_matches_alias;
use crate::domain::sheet::{normalize_header, Grid};

/// Number of cells in `row` that match at least one alias.
pub fn score_row(row: &[String], aliases: &[&str]) -> usize {
    row.iter()
        .map(|cell| normalize_header(cell))
        .filter(|key| !key.is_empty())
        .filter(|key| aliases.iter().any(|alias| header_matches_alias(key, alias)))
        .count()
}

/// Pick the header row.
///
/// The configured offset wins when that row matches at least one alias. Otherwise the
/// best-scoring row among the first `scan_rows` rows is used, provided it matches at
/// least two aliases; ties go to the earliest row.
pub fn locate_header(
    grid: &Grid,
    aliases: &[&str],
    hint: Option<usize>,
    scan_rows: usize,
) -> Option<usize> {
    if let Some(row) = hint.and_then(|idx| grid.get(idx)) {
        if score_row(row, aliases) >= 1 {
            return hint;
        }
    }

    let mut best: Option<(usize, usize)> = None;
    for (idx, row) in grid.iter().take(scan_rows).enumerate() {
        let score = score_row(row, aliases);
        if score < 2 {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((idx, score)),
        }
    }

    best.map(|(idx, _)| idx)
        .or_else(|| hint.filter(|idx| *idx < grid.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIASES: &[&str] = &["client_code", "isin", "free_balance", "total_holding"];

    fn grid(rows: &[&[&str]]) -> Grid {
        rows.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_hint_is_used_when_it_matches() {
        let g = grid(&[&["Report"], &["Client Code", "ISIN", "Free Balance"], &["C1", "X", "1"]]);
        assert_eq!(locate_header(&g, ALIASES, Some(1), 10), Some(1));
    }

    #[test]
    fn test_wrong_hint_falls_back_to_detection() {
        let g = grid(&[
            &["HOLDING STATEMENT"],
            &["As on 30/06/2024"],
            &["Client Code", "ISIN", "Total Holding", "Free Balance"],
            &["C1", "INE002A01018", "10", "10"],
        ]);
        assert_eq!(locate_header(&g, ALIASES, Some(0), 10), Some(2));
    }

    #[test]
    fn test_no_header_found() {
        let g = grid(&[&["a", "b"], &["1", "2"]]);
        assert_eq!(locate_header(&g, ALIASES, None, 10), None);
    }
}
