//! Spreadsheet reading (xlsx / xlsm / xls / ods) via calamine.
//!
//! Only the first worksheet is read. The first non-blank row is the header
//! (trimmed); every cell is rendered as text so spreadsheets and CSVs feed the
//! standardizer identically.

use calamine::{Data, Ods, Range, Reader, Xls, Xlsx};
use serde::Serialize;
use std::fmt::Display;
use std::io::{Cursor, Read, Seek};

use super::{FileFormat, RawTable};
use crate::error::{ParseError, ParseResult};

/// Workbook container flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkbookKind {
    Xlsx,
    Xls,
    Ods,
}

/// Read the first worksheet of an in-memory workbook.
pub fn parse_workbook(bytes: &[u8], kind: WorkbookKind) -> ParseResult<RawTable> {
    if bytes.is_empty() {
        return Err(ParseError::EmptyFile);
    }

    let cursor = Cursor::new(bytes);
    let (sheet, range) = match kind {
        WorkbookKind::Xlsx => first_sheet(Xlsx::new(cursor).map_err(spreadsheet_error)?)?,
        WorkbookKind::Xls => first_sheet(Xls::new(cursor).map_err(spreadsheet_error)?)?,
        WorkbookKind::Ods => first_sheet(Ods::new(cursor).map_err(spreadsheet_error)?)?,
    };

    let (headers, rows) = table_from_range(&range)?;

    Ok(RawTable {
        headers,
        rows,
        format: FileFormat::Spreadsheet(kind),
        encoding: None,
        delimiter: None,
        sheet: Some(sheet),
    })
}

fn first_sheet<R, RS>(mut workbook: R) -> ParseResult<(String, Range<Data>)>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: Display,
{
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(ParseError::EmptyFile)?;
    let range = workbook.worksheet_range(&name).map_err(spreadsheet_error)?;
    Ok((name, range))
}

fn spreadsheet_error(err: impl Display) -> ParseError {
    ParseError::Spreadsheet(err.to_string())
}

/// Split a cell range into headers and padded rows, skipping blank rows.
fn table_from_range(range: &Range<Data>) -> ParseResult<(Vec<String>, Vec<Vec<String>>)> {
    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>())
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()));

    let headers: Vec<String> = rows
        .next()
        .ok_or(ParseError::EmptyFile)?
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect();
    let width = headers.len();

    let rows = rows
        .map(|mut row| {
            row.resize(width, String::new());
            row
        })
        .collect();

    Ok((headers, rows))
}

/// Render a cell as text.
pub fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // whole floats lose the ".0" so ids and amounts read like the sheet shows them
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| dt.as_f64().to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

/// In-memory xlsx with one "Transactions" sheet; numeric-looking cells are
/// written as numbers, blank cells are left empty.
#[cfg(test)]
pub(crate) fn xlsx_fixture(rows: &[&[&str]]) -> Vec<u8> {
    let mut workbook = rust_xlsxwriter::Workbook::new();
    {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Transactions").unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if value.is_empty() {
                    continue;
                }
                let (r, c) = (r as u32, c as u16);
                match value.parse::<f64>() {
                    Ok(number) => sheet.write_number(r, c, number).unwrap(),
                    Err(_) => sheet.write_string(r, c, *value).unwrap(),
                };
            }
        }
    }
    workbook.save_to_buffer().unwrap()
}
