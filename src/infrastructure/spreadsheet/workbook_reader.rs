// ============================================================
// WORKBOOK READER
// ============================================================
// Read one worksheet of an .xlsx/.xls/.xlsm/.ods file into a grid

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::warn;

use crate::domain::error::{AppError, Result};
use crate::domain::sheet::{clean_cell, Grid};

pub struct WorkbookReader;

impl WorkbookReader {
    /// Read `sheet_name` (case-insensitive) or the first sheet when it is absent or missing.
    pub fn read_file(path: &Path, sheet_name: Option<&str>) -> Result<Grid> {
        let mut workbook = open_workbook_auto(path).map_err(|e| {
            AppError::ParseError(format!("Failed to open workbook {}: {}", path.display(), e))
        })?;

        let sheet_names = workbook.sheet_names();
        if sheet_names.is_empty() {
            return Err(AppError::ParseError(format!(
                "Workbook {} has no worksheets",
                path.display()
            )));
        }

        let index = match sheet_name {
            Some(wanted) => match find_sheet(&sheet_names, wanted) {
                Some(index) => index,
                None => {
                    warn!(
                        file = %path.display(),
                        sheet = wanted,
                        available = ?sheet_names,
                        "Expected sheet not found, using first sheet"
                    );
                    0
                }
            },
            None => 0,
        };

        let range = workbook
            .worksheet_range_at(index)
            .ok_or_else(|| {
                AppError::ParseError(format!("Worksheet {} not found", sheet_names[index]))
            })?
            .map_err(|e| {
                AppError::ParseError(format!(
                    "Failed to read worksheet {} of {}: {}",
                    sheet_names[index],
                    path.display(),
                    e
                ))
            })?;

        // The used range starts at the first non-empty cell; pad so grid rows match sheet rows.
        let (first_row, _) = range.start().unwrap_or((0, 0));
        let mut grid: Grid = vec![Vec::new(); first_row as usize];
        grid.extend(
            range
                .rows()
                .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>()),
        );

        Ok(grid)
    }
}

fn find_sheet(sheet_names: &[String], wanted: &str) -> Option<usize> {
    let wanted = wanted.trim().to_lowercase();
    sheet_names
        .iter()
        .position(|name| name.trim().to_lowercase() == wanted)
}

/// Render a cell the way it would appear in a CSV export of the same sheet.
pub(super) fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => clean_cell(s),
        Data::Float(f) => format_float(*f),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        // Serial numbers; the value parser understands them.
        Data::DateTime(dt) => format_float(dt.as_f64()),
        Data::DateTimeIso(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_to_string() {
        assert_eq!(cell_to_string(&Data::Float(1200.0)), "1200");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Int(-3)), "-3");
        assert_eq!(cell_to_string(&Data::String("  INE002A01018 ".to_string())), "INE002A01018");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }

    #[test]
    fn test_find_sheet_is_case_insensitive() {
        let names = vec!["Summary".to_string(), "HOLDINGS ".to_string()];
        assert_eq!(find_sheet(&names, "Holdings"), Some(1));
        assert_eq!(find_sheet(&names, "Trades"), None);
    }

    #[test]
    fn test_reads_named_sheet_with_absolute_rows() {
        let path = std::env::temp_dir().join(format!("custody-etl-{}.xlsx", uuid::Uuid::new_v4()));
        crate::infrastructure::spreadsheet::write_test_workbook(
            &path,
            &[
                ("Summary", &[&["Total clients", "2"]]),
                (
                    "Holdings",
                    &[
                        &["", ""],
                        &["", ""],
                        &["ISIN", "Total Qty"],
                        &["INE002A01018", "100"],
                        &["", ""],
                        &["INE009A01021", "12.5"],
                    ],
                ),
            ],
        );

        let grid = WorkbookReader::read_file(&path, Some("holdings")).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(grid.len(), 6);
        assert!(grid[0].is_empty());
        assert_eq!(grid[2], vec!["ISIN", "Total Qty"]);
        assert_eq!(grid[3], vec!["INE002A01018", "100"]);
        assert!(grid[4].iter().all(|cell| cell.is_empty()));
        assert_eq!(grid[5][1], "12.5");
    }

    #[test]
    fn test_missing_workbook_is_a_parse_error() {
        let err = WorkbookReader::read_file(Path::new("does-not-exist.xlsx"), None).unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }
}
