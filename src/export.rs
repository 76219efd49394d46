use crate::error::{AppError, Result};
use crate::table::{Table, Value};

/// Download formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    /// Parses a `format` query value
    ///
    /// # Errors
    /// * `ValidationError` for anything but `csv` and `xlsx`
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            other => Err(AppError::validation(format!(
                "unsupported export format `{}`: expected csv or xlsx",
                other
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

/// Convert a table to CSV
///
/// The first record holds the column names; nulls become empty fields and
/// quoting is left to the CSV writer.
///
/// # Arguments
/// * `table` - Table to export
///
/// # Returns
/// * `Result<Vec<u8>>` - UTF-8 CSV content
pub fn to_csv(table: &Table) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.columns.iter().map(|c| c.name.as_str()))?;
    for row in &table.rows {
        writer.write_record(row.values.iter().map(|v| v.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("failed to finish CSV export: {}", e)))
}

/// Convert a table to an XLSX workbook with a single worksheet
///
/// Numbers are written as numbers, text as strings and nulls are left blank.
#[cfg(feature = "web")]
pub fn to_xlsx(table: &Table) -> Result<Vec<u8>> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let xlsx_err = |e: rust_xlsxwriter::XlsxError| AppError::Internal(format!("XLSX export failed: {}", e));

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(sheet_name(&table.name)).map_err(xlsx_err)?;

    for (c, column) in table.columns.iter().enumerate() {
        worksheet
            .write_string(0, c as u16, column.name.as_str())
            .map_err(xlsx_err)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, value) in row.values.iter().enumerate() {
            match value {
                Value::Null => {}
                Value::Number(n) => {
                    worksheet.write_number(r, c as u16, *n).map_err(xlsx_err)?;
                }
                Value::Text(s) => {
                    worksheet.write_string(r, c as u16, s.as_str()).map_err(xlsx_err)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx_err)
}

/// Worksheet names are limited to 31 characters
#[cfg(feature = "web")]
fn sheet_name(table_name: &str) -> String {
    let name: String = table_name.chars().take(31).collect();
    if name.is_empty() { "Sheet1".to_string() } else { name }
}
