// ============================================================
// CSV READER
// ============================================================
// Decode delimited text exports into a grid of trimmed cells

use std::path::Path;

use csv::{ReaderBuilder, Trim};
use encoding_rs::WINDOWS_1252;

use crate::domain::error::{AppError, Result};
use crate::domain::sheet::{clean_cell, Grid};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Reader for custodian CSV exports
#[derive(Debug, Default)]
pub struct CsvReader;

impl CsvReader {
    pub fn new() -> Self {
        Self
    }

    /// Read a file into a grid, header line included
    pub fn read_file(&self, path: &Path) -> Result<Grid> {
        let bytes = std::fs::read(path).map_err(|e| {
            AppError::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let content = decode(&bytes);
        self.read_content(&content)
    }

    /// Parse delimited content into a grid
    pub fn read_content(&self, content: &str) -> Result<Grid> {
        let delimiter = Self::detect_delimiter(content);

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .trim(Trim::All)
            .flexible(true) // Banner rows are shorter than data rows
            .from_reader(content.as_bytes());

        let mut grid = Vec::new();
        for (index, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                AppError::ParseError(format!("Failed to parse CSV line {}: {}", index + 1, e))
            })?;
            // Separator-only lines stay in the grid; the loader counts them as skipped.
            grid.push(record.iter().map(clean_cell).collect());
        }

        Ok(grid)
    }

    /// Detect delimiter from content (comma, semicolon, tab, pipe)
    pub fn detect_delimiter(content: &str) -> u8 {
        let candidates = [b',', b';', b'\t', b'|'];
        let sample_lines: Vec<_> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(20)
            .collect();

        let mut best_delimiter = b',';
        let mut best_score = 0.0f32;

        if sample_lines.is_empty() {
            return best_delimiter;
        }

        for &delimiter in &candidates {
            let field_counts: Vec<usize> = sample_lines
                .iter()
                .map(|line| line.bytes().filter(|&b| b == delimiter).count())
                .collect();

            // Score by consistency (low standard deviation) and frequency
            let avg = field_counts.iter().sum::<usize>() as f32 / field_counts.len() as f32;
            let variance = field_counts
                .iter()
                .map(|&x| (x as f32 - avg).powi(2))
                .sum::<f32>()
                / field_counts.len() as f32;

            let score = avg / (1.0 + variance.sqrt());

            if score > best_score {
                best_score = score;
                best_delimiter = delimiter;
            }
        }

        best_delimiter
    }
}

/// UTF-8 (BOM stripped) when valid, otherwise Windows-1252, which is what the
/// older back-office exports are written in.
pub fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(content) => content.to_string(),
        Err(_) => {
            let (content, _, _) = WINDOWS_1252.decode(bytes);
            content.into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_simple_csv() {
        let content = "Client Code,ISIN,Free Balance\nC1,INE002A01018,\"1,200\"\n\n";
        let grid = CsvReader::new().read_content(content).unwrap();

        assert_eq!(grid.len(), 2);
        assert_eq!(grid[0], vec!["Client Code", "ISIN", "Free Balance"]);
        assert_eq!(grid[1][2], "1,200");
    }

    #[test]
    fn test_separator_only_rows_are_kept() {
        let content = "Client Code,ISIN\nC1,INE002A01018\n,\nC2,INE009A01021\n";
        let grid = CsvReader::new().read_content(content).unwrap();

        assert_eq!(grid.len(), 4);
        assert!(grid[2].iter().all(|cell| cell.is_empty()));
    }

    #[test]
    fn test_detect_delimiter() {
        assert_eq!(CsvReader::detect_delimiter("a,b,c\nd,e,f"), b',');
        assert_eq!(CsvReader::detect_delimiter("a;b;c\nd;e;f"), b';');
        assert_eq!(CsvReader::detect_delimiter("a\tb\tc\nd\te\tf"), b'\t');
        assert_eq!(CsvReader::detect_delimiter("a|b|c\nd|e|f"), b'|');
    }

    #[test]
    fn test_decode_falls_back_to_windows_1252() {
        // "Société" with é as 0xE9
        let bytes = b"Soci\xe9t\xe9";
        assert_eq!(decode(bytes), "Société");
        assert_eq!(decode(b"\xEF\xBB\xBFISIN"), "ISIN");
    }
}
