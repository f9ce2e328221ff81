// ============================================================
// SHEET DOMAIN LAYER
// ============================================================
// Tabular content read from CSV or workbook files
// No I/O, no async

mod raw_sheet;

pub use raw_sheet::{clean_cell, is_blank_row, normalize_header, Grid, RawSheet};
