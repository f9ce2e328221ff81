// ============================================================
// SPREADSHEET INFRASTRUCTURE LAYER
// ============================================================
// CSV and workbook reading, encoding detection, header location

mod csv_reader;
mod header_locator;
mod workbook_reader;

use std::path::Path;

pub use csv_reader::CsvReader;
pub use header_locator::locate_header;
pub use workbook_reader::WorkbookReader;

use crate::domain::error::{AppError, Result};
use crate::domain::sheet::Grid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Delimited,
    Workbook,
}

pub const SUPPORTED_EXTENSIONS: &[&str] = &["xlsx", "xls", "xlsm", "ods", "csv", "txt"];

impl FileFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" | "txt" => Ok(FileFormat::Delimited),
            "xlsx" | "xls" | "xlsm" | "ods" => Ok(FileFormat::Workbook),
            other => Err(AppError::ValidationError(format!(
                "Unsupported file type '{}' for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Read the data sheet of a file. `sheet_name` only applies to workbooks.
pub fn read_grid(path: &Path, sheet_name: Option<&str>) -> Result<Grid> {
    match FileFormat::from_path(path)? {
        FileFormat::Delimited => CsvReader::new().read_file(path),
        FileFormat::Workbook => WorkbookReader::read_file(path, sheet_name),
    }
}

/// Write a minimal .xlsx with inline-string and numeric cells. Fully empty rows are left
/// out of the sheet XML, the way spreadsheet tools save them.
#[cfg(test)]
pub(crate) fn write_test_workbook(path: &Path, sheets: &[(&str, &[&[&str]])]) {
    use std::io::Write;
    use zip::write::FileOptions;
    use zip::CompressionMethod;

    const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
    const DOC_REL: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    let escape = |text: &str| {
        text.replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
    };

    let mut overrides = String::new();
    let mut sheet_entries = String::new();
    let mut sheet_rels = String::new();
    let mut sheet_xml = Vec::new();
    for (idx, (name, rows)) in sheets.iter().enumerate() {
        let n = idx + 1;
        overrides.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
        sheet_entries.push_str(&format!(
            r#"<sheet name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
            escape(name)
        ));
        sheet_rels.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="{DOC_REL}/worksheet" Target="worksheets/sheet{n}.xml"/>"#
        ));

        let mut data = String::new();
        for (r, row) in rows.iter().enumerate() {
            if row.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            data.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, cell) in row.iter().enumerate().filter(|(_, cell)| !cell.is_empty()) {
                let cell_ref = format!("{}{}", (b'A' + c as u8) as char, r + 1);
                if cell.parse::<f64>().is_ok() {
                    data.push_str(&format!(r#"<c r="{cell_ref}"><v>{cell}</v></c>"#));
                } else {
                    data.push_str(&format!(
                        r#"<c r="{cell_ref}" t="inlineStr"><is><t>{}</t></is></c>"#,
                        escape(cell)
                    ));
                }
            }
            data.push_str("</row>");
        }
        sheet_xml.push(format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="{MAIN_NS}"><sheetData>{data}</sheetData></worksheet>"#
        ));
    }

    let parts = [
        (
            "[Content_Types].xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>{overrides}</Types>"#
            ),
        ),
        (
            "_rels/.rels".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{REL_NS}"><Relationship Id="rId1" Type="{DOC_REL}/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
            ),
        ),
        (
            "xl/workbook.xml".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="{MAIN_NS}" xmlns:r="{DOC_REL}"><sheets>{sheet_entries}</sheets></workbook>"#
            ),
        ),
        (
            "xl/_rels/workbook.xml.rels".to_string(),
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="{REL_NS}">{sheet_rels}</Relationships>"#
            ),
        ),
    ];

    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options: FileOptions<'_, ()> =
        FileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, body) in parts {
        zip.start_file(name, options.clone()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    for (idx, body) in sheet_xml.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", idx + 1), options.clone())
            .unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_format_from_path() {
        assert_eq!(FileFormat::from_path(Path::new("a/HDFC.XLSX")).unwrap(), FileFormat::Workbook);
        assert_eq!(FileFormat::from_path(Path::new("axis.csv")).unwrap(), FileFormat::Delimited);
        assert!(FileFormat::from_path(Path::new("notes.pdf")).is_err());
    }
}
