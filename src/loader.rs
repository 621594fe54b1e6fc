use crate::dataset::{CellValue, Dataset, records_from_rows, tag_provenance};
use crate::error::LoadError;
use std::io::Cursor;
use std::path::Path;

/// Load a dataset from CSV text
///
/// The first row is the header, every following row becomes a record.
/// Quoted fields may contain commas, doubled quotes and line breaks.
///
/// # Arguments
/// * `text` - CSV content
///
/// # Returns
/// * `Result<Dataset, LoadError>` - The loaded dataset; a header without rows
///   yields an empty dataset
///
/// # Examples
/// ```
/// use sheetchat::loader::from_csv_str;
///
/// let ds = from_csv_str("region,total\nnorth,10\n").unwrap();
/// assert_eq!(ds.len(), 1);
/// ```
pub fn from_csv_str(text: &str) -> Result<Dataset, LoadError> {
    let mut rows = parse_csv(text).into_iter();
    let header = rows.next().ok_or(LoadError::Empty)?;
    let data: Vec<Vec<CellValue>> = rows
        .map(|row| row.iter().map(|v| CellValue::parse(v)).collect())
        .collect();
    Ok(Dataset::new(records_from_rows(&header, data)))
}

/// Load a dataset from the first worksheet of an Excel workbook
pub fn from_excel_bytes(bytes: &[u8]) -> Result<Dataset, LoadError> {
    use calamine::{Data, Reader, open_workbook_auto_from_rs};

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| LoadError::Excel(e.to_string()))?;

    // Get the first worksheet
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| LoadError::Excel("no sheets found in workbook".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| LoadError::Excel(e.to_string()))?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .ok_or(LoadError::Empty)?
        .iter()
        .map(|cell| cell.to_string())
        .collect();

    let data: Vec<Vec<CellValue>> = rows
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    Data::Int(i) => CellValue::Number(*i as f64),
                    Data::Float(f) => CellValue::Number(*f),
                    Data::String(s) => CellValue::parse(s),
                    Data::Empty => CellValue::Empty,
                    other => CellValue::Text(other.to_string()),
                })
                .collect()
        })
        .collect();

    Ok(Dataset::new(records_from_rows(&header, data)))
}

/// Detect file type and load an uploaded file
///
/// This function examines the file extension and calls the appropriate loader
/// for CSV or Excel content. Every record is tagged with the file name as its
/// provenance.
///
/// # Arguments
/// * `filename` - Name of the uploaded file, used for type detection and provenance
/// * `bytes` - File content
///
/// # Examples
/// ```
/// use sheetchat::loader::load_upload;
///
/// let ds = load_upload("sales.csv", b"total\n5\n").unwrap();
/// assert_eq!(ds.len(), 1);
/// assert!(load_upload("notes.txt", b"x").is_err());
/// ```
pub fn load_upload(filename: &str, bytes: &[u8]) -> Result<Dataset, LoadError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());

    let dataset = match extension.as_deref() {
        Some("csv") => from_csv_str(std::str::from_utf8(bytes)?)?,
        Some("xlsx") | Some("xls") | Some("xlsm") | Some("ods") => from_excel_bytes(bytes)?,
        Some(ext) => return Err(LoadError::UnsupportedExtension(ext.to_string())),
        None => return Err(LoadError::MissingExtension),
    };

    let mut records = dataset.records().to_vec();
    tag_provenance(&mut records, filename);
    Ok(Dataset::new(records))
}

/// Split CSV text into rows of fields
fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut row_started = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        row_started = true;
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    // Doubled quote inside quoted field - add a single quote
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current_field.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                row.push(std::mem::take(&mut current_field));
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                row.push(std::mem::take(&mut current_field));
                rows.push(std::mem::take(&mut row));
                row_started = false;
            }
            _ => current_field.push(c),
        }
    }

    // Last row without a trailing newline
    if row_started {
        row.push(current_field);
        rows.push(row);
    }

    rows
}
