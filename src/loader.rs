#![cfg(not(tarpaulin_include))]

use crate::error::{AppError, Result};
use crate::table::Value;
use csv::{ReaderBuilder, Trim};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;

lazy_static! {
    static ref NON_IDENT: Regex = Regex::new(r"[^A-Za-z0-9_]").unwrap();
}

/// Supported upload formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Csv,
    Xlsx,
}

/// An uploaded file, parsed but not yet typed
///
/// Every row has exactly `headers.len()` values, each either `Null` or
/// trimmed `Text`.
#[derive(Debug, Clone)]
pub struct ParsedUpload {
    /// Table name derived from the filename
    pub table_name: String,

    /// Normalized, unique column names
    pub headers: Vec<String>,

    /// Raw data rows
    pub rows: Vec<Vec<Value>>,
}

/// Parse an uploaded file
///
/// The format is chosen from the filename extension (`csv` or `xlsx`) and
/// the table name from its stem.
///
/// # Arguments
/// * `filename` - Client-supplied filename, e.g. `"Sales 2024.csv"`
/// * `bytes` - File content
///
/// # Returns
/// * `Result<ParsedUpload>` - Headers and rows, or an error
///
/// # Errors
/// * `ValidationError` for unsupported extensions or unusable names
/// * `EmptyInput` for empty files or files without a header row
/// * `ParseError` when the content cannot be decoded
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<ParsedUpload> {
    let format = detect_format(filename)?;
    let table_name = table_name_from_filename(filename)?;

    if bytes.is_empty() {
        return Err(AppError::EmptyInput(format!("file `{}` is empty", filename)));
    }

    let (raw_headers, rows) = match format {
        UploadFormat::Csv => from_csv(bytes)?,
        UploadFormat::Xlsx => from_excel(bytes)?,
    };

    if raw_headers.is_empty() || raw_headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::EmptyInput(format!(
            "file `{}` has no header row",
            filename
        )));
    }

    let headers = normalize_headers(&raw_headers);
    let width = headers.len();
    let rows = rows
        .into_iter()
        .map(|mut row| {
            row.resize(width, Value::Null);
            row
        })
        .collect();

    Ok(ParsedUpload {
        table_name,
        headers,
        rows,
    })
}

/// Read and parse a file from disk
///
/// # Examples
/// ```no_run
/// use datavis::loader::load_file;
///
/// match load_file("sales.csv") {
///     Ok(upload) => println!("{} rows in {}", upload.rows.len(), upload.table_name),
///     Err(e) => eprintln!("Error loading file: {}", e),
/// }
/// ```
pub fn load_file(path: impl AsRef<Path>) -> Result<ParsedUpload> {
    let path = path.as_ref();
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AppError::validation("file has no usable name"))?;
    let bytes = std::fs::read(path)?;
    parse_upload(filename, &bytes)
}

/// Pick the loader from the filename extension
pub fn detect_format(filename: &str) -> Result<UploadFormat> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    match extension.as_deref() {
        Some("csv") => Ok(UploadFormat::Csv),
        Some("xlsx") => Ok(UploadFormat::Xlsx),
        Some(ext) => Err(AppError::validation(format!(
            "unsupported file extension `{}`: only CSV and XLSX files are supported",
            ext
        ))),
        None => Err(AppError::validation("file has no extension")),
    }
}

/// Table name from a filename: the stem, spaces to underscores, anything
/// outside `[A-Za-z0-9_]` dropped
///
/// # Examples
/// ```
/// use datavis::loader::table_name_from_filename;
///
/// assert_eq!(table_name_from_filename("Sales 2024.csv").unwrap(), "Sales_2024");
/// ```
pub fn table_name_from_filename(filename: &str) -> Result<String> {
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let name = sanitize_identifier(stem);
    if name.is_empty() {
        return Err(AppError::validation(format!(
            "cannot derive a table name from `{}`",
            filename
        )));
    }
    Ok(name)
}

/// Spaces become underscores, other non-identifier characters are removed
pub fn sanitize_identifier(raw: &str) -> String {
    let underscored = raw.trim().replace(' ', "_");
    NON_IDENT.replace_all(&underscored, "").into_owned()
}

/// Whether `name` is already a valid table identifier
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && !NON_IDENT.is_match(name)
}

fn from_csv(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|field| String::from_utf8_lossy(field).into_owned())
        .collect();

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| Value::from_raw(&String::from_utf8_lossy(field)))
                .collect(),
        );
    }

    Ok((headers, rows))
}

fn from_excel(bytes: &[u8]) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    use calamine::{Data, Reader, Xlsx, open_workbook_from_rs};

    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes.to_vec()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AppError::EmptyInput("no sheets found in Excel file".to_string()))??;

    let cell_value = |cell: &Data| match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::String(s) => Value::from_raw(s),
        Data::Float(f) => Value::Text(f.to_string()),
        Data::Int(i) => Value::Text(i.to_string()),
        other => Value::from_raw(&other.to_string()),
    };

    let mut sheet_rows = range.rows();
    let headers = match sheet_rows.next() {
        Some(header) => header.iter().map(|cell| cell_value(cell).to_string()).collect(),
        None => Vec::new(),
    };
    let rows = sheet_rows
        .map(|row| row.iter().map(cell_value).collect())
        .collect();

    Ok((headers, rows))
}

/// Blank headers become `column_<n>`, repeated ones get a `_<n>` suffix
fn normalize_headers(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut headers = Vec::with_capacity(raw.len());

    for (i, header) in raw.iter().enumerate() {
        let mut name = sanitize_identifier(header);
        if name.is_empty() {
            name = format!("column_{}", i + 1);
        }
        if name == "_id" {
            name = "id_".to_string();
        }

        let mut candidate = name.clone();
        let mut n = 2;
        while !seen.insert(candidate.clone()) {
            candidate = format!("{}_{}", name, n);
            n += 1;
        }
        headers.push(candidate);
    }

    headers
}
