//! Tabular file loading with format, encoding and delimiter auto-detection.
//!
//! Produces a [`RawTable`]: headers in file order and rows of text cells.
//! No canonical-schema logic here; see [`crate::processing`].

pub mod spreadsheet;

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;

use crate::error::{LoadError, ParseError, ParseResult, UnsupportedFormatError};
use spreadsheet::WorkbookKind;

/// Format of the input file, decided from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Spreadsheet(WorkbookKind),
}

impl FileFormat {
    /// Pick the format from a file name or path.
    pub fn from_name(name: &str) -> Result<Self, UnsupportedFormatError> {
        let extension = Path::new(name.trim())
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "csv" | "txt" => Ok(FileFormat::Csv),
            "xlsx" | "xlsm" => Ok(FileFormat::Spreadsheet(WorkbookKind::Xlsx)),
            "xls" => Ok(FileFormat::Spreadsheet(WorkbookKind::Xls)),
            "ods" => Ok(FileFormat::Spreadsheet(WorkbookKind::Ods)),
            _ => Err(UnsupportedFormatError { extension }),
        }
    }
}

/// A raw record set: arbitrary headers, text cells.
#[derive(Debug, Clone, Serialize)]
pub struct RawTable {
    /// Column headers, file order, trimmed.
    pub headers: Vec<String>,
    /// Data rows, each exactly `headers.len()` cells long.
    pub rows: Vec<Vec<String>>,
    pub format: FileFormat,
    /// Detected text encoding (delimited text only).
    pub encoding: Option<String>,
    /// Detected or forced delimiter (delimited text only).
    pub delimiter: Option<char>,
    /// Worksheet that was read (spreadsheets only).
    pub sheet: Option<String>,
}

impl RawTable {
    /// Build an in-memory table; short rows are padded, long rows truncated.
    pub fn from_rows<H, R, C>(headers: H, rows: R) -> Self
    where
        H: IntoIterator,
        H::Item: Into<String>,
        R: IntoIterator,
        R::Item: IntoIterator<Item = C>,
        C: Into<String>,
    {
        let headers: Vec<String> = headers.into_iter().map(Into::into).collect();
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|row| {
                let mut cells: Vec<String> = row.into_iter().map(Into::into).collect();
                cells.resize(width, String::new());
                cells
            })
            .collect();

        Self {
            headers,
            rows,
            format: FileFormat::Csv,
            encoding: None,
            delimiter: None,
            sheet: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by header (first column wins on duplicates).
    pub fn records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut obj = Map::new();
                for (header, cell) in self.headers.iter().zip(row) {
                    obj.entry(header.clone())
                        .or_insert_with(|| Value::String(cell.clone()));
                }
                Value::Object(obj)
            })
            .collect()
    }
}

// =============================================================================
// Entry points
// =============================================================================

/// Load a CSV or spreadsheet file, dispatching on its extension.
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<RawTable, LoadError> {
    let path = path.as_ref();
    let format = FileFormat::from_name(&path.to_string_lossy())?;
    let bytes = std::fs::read(path).map_err(ParseError::from)?;
    Ok(parse_bytes(&bytes, format)?)
}

/// Like [`load_file`], with a forced delimiter for delimited text.
///
/// `delimiter` is ignored for spreadsheets.
pub fn load_file_with_delimiter<P: AsRef<Path>>(
    path: P,
    delimiter: Option<char>,
) -> Result<RawTable, LoadError> {
    let path = path.as_ref();
    let format = FileFormat::from_name(&path.to_string_lossy())?;
    let bytes = std::fs::read(path).map_err(ParseError::from)?;
    match format {
        FileFormat::Csv => Ok(parse_csv_bytes(&bytes, delimiter)?),
        FileFormat::Spreadsheet(_) => Ok(parse_bytes(&bytes, format)?),
    }
}

/// Load uploaded bytes, dispatching on the original file name.
pub fn load_bytes(bytes: &[u8], file_name: &str) -> Result<RawTable, LoadError> {
    let format = FileFormat::from_name(file_name)?;
    Ok(parse_bytes(bytes, format)?)
}

/// Parse bytes of a known format.
pub fn parse_bytes(bytes: &[u8], format: FileFormat) -> ParseResult<RawTable> {
    match format {
        FileFormat::Csv => parse_csv_bytes(bytes, None),
        FileFormat::Spreadsheet(kind) => spreadsheet::parse_workbook(bytes, kind),
    }
}

// =============================================================================
// Delimited text
// =============================================================================

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let (charset, _confidence, _language) = chardet::detect(bytes);

    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to text with the given encoding, dropping a leading BOM.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    let text = match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        // utf-8 and anything unknown: lossy utf-8
        _ => String::from_utf8_lossy(bytes).into_owned(),
    };

    match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    }
}

/// Detect the delimiter by counting occurrences in the header line.
///
/// Ties go to the earlier candidate; a line with none of them is comma-separated.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");

    let mut best_sep = ',';
    let mut best_count = 0;

    for sep in [',', ';', '\t', '|'] {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse delimited bytes: detect encoding, decode, detect (or force) the delimiter.
pub fn parse_csv_bytes(bytes: &[u8], delimiter: Option<char>) -> ParseResult<RawTable> {
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = delimiter.unwrap_or_else(|| detect_delimiter(&content));

    let mut table = parse_csv_str(&content, delimiter)?;
    table.encoding = Some(encoding);
    Ok(table)
}

/// Parse already-decoded delimited text.
///
/// Headers are trimmed, cells are kept verbatim. Fully blank lines are
/// skipped; short rows are padded with empty cells and cells beyond the
/// header width are ignored.
pub fn parse_csv_str(content: &str, delimiter: char) -> ParseResult<RawTable> {
    if !delimiter.is_ascii() {
        return Err(ParseError::InvalidDelimiter(delimiter));
    }
    if content.trim().is_empty() {
        return Err(ParseError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ParseError::NoHeaders);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let row = (0..headers.len())
            .map(|i| record.get(i).unwrap_or("").to_string())
            .collect();
        rows.push(row);
    }

    Ok(RawTable {
        headers,
        rows,
        format: FileFormat::Csv,
        encoding: None,
        delimiter: Some(delimiter),
        sheet: None,
    })
}
