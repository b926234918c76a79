//! Parses raw delimited text into the shape the import coordinator consumes:
//! a header row, a header-to-column-index map, and raw data rows.
//!
//! Uses the `csv` crate so commas and newlines inside quoted fields are
//! preserved. Rows with the wrong field count are kept; the row importer
//! rejects them individually so one bad row never aborts the run.

use std::collections::HashMap;
use std::io::Cursor;

use csv::ReaderBuilder;

use crate::error::AppError;

/// A parsed upload: headers plus raw data rows.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Header names as written, trimmed.
    pub headers: Vec<String>,
    /// Lowercased header name to column index.
    pub header_map: HashMap<String, usize>,
    /// Data rows in file order.
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Total data rows (the header does not count).
    pub fn total_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Column names (lowercased) missing from the header.
    pub fn missing_columns<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|col| !self.header_map.contains_key(&col.to_lowercase()))
            .copied()
            .collect()
    }
}

/// Parses CSV text into a `Dataset`.
///
/// # Errors
///
/// Returns `AppError::CsvInvalid` when the text has no header row or a
/// record cannot be parsed at all (unterminated quote and the like).
pub fn parse_dataset(text: &str) -> Result<Dataset, AppError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(text.as_bytes()));

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::CsvInvalid(format!("Failed to read header row: {e}")))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(AppError::CsvInvalid("CSV has no header row".to_string()));
    }

    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.to_lowercase(), i))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| AppError::CsvInvalid(format!("Failed to read CSV record: {e}")))?;
        rows.push(record.iter().map(|f| f.to_string()).collect());
    }

    Ok(Dataset {
        headers,
        header_map,
        rows,
    })
}
