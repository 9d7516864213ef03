//! Excel import (xlsx, xls, ods) through calamine.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};

use super::{unique_headers, FetchError, ImportedTable};
use crate::data_registry::{SourceInfo, SourceKind};
use crate::table::{Cell, Column, Table};

fn excel_err(e: impl std::fmt::Display) -> FetchError {
    FetchError::Excel(e.to_string())
}

/// Excel serial day number to a timestamp (1900 date system).
fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round();
    if !millis.is_finite() || millis.abs() > 1.0e15 {
        return None;
    }
    epoch.checked_add_signed(Duration::milliseconds(millis as i64))
}

fn to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Null,
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) => Cell::Float(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::String(s) if s.is_empty() => Cell::Null,
        Data::String(s) => Cell::Text(s.clone()),
        Data::DateTime(dt) => serial_to_datetime(dt.as_f64())
            .map(Cell::DateTime)
            .unwrap_or(Cell::Float(dt.as_f64())),
        Data::DateTimeIso(s) => crate::table::parse_datetime(s)
            .map(Cell::DateTime)
            .unwrap_or_else(|| Cell::Text(s.clone())),
        Data::DurationIso(s) => Cell::Text(s.clone()),
    }
}

fn header_text(data: &Data) -> String {
    match to_cell(data).as_text() {
        Some(text) => text,
        None => String::new(),
    }
}

pub fn sheet_names(bytes: &[u8]) -> Result<Vec<String>, FetchError> {
    let workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(excel_err)?;
    Ok(workbook.sheet_names())
}

/// Reads `sheet` (default: the first one). The first row is the header.
pub fn read_sheet(bytes: &[u8], sheet: Option<&str>) -> Result<(Table, String), FetchError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec())).map_err(excel_err)?;
    let names = workbook.sheet_names();
    let sheet = match sheet {
        Some(s) if names.iter().any(|n| n == s) => s.to_string(),
        Some(s) => return Err(FetchError::InvalidInput(format!("worksheet '{}' not found", s))),
        None => names
            .first()
            .cloned()
            .ok_or_else(|| FetchError::Excel("workbook has no sheets".to_string()))?,
    };
    let range = workbook.worksheet_range(&sheet).map_err(excel_err)?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Ok((Table::default(), sheet));
    };
    let headers = unique_headers(header_row.iter().map(header_text).collect());
    let mut values: Vec<Vec<Cell>> = vec![Vec::new(); headers.len()];
    for row in rows {
        for (i, column) in values.iter_mut().enumerate() {
            column.push(row.get(i).map(to_cell).unwrap_or(Cell::Null));
        }
    }
    let columns = headers
        .into_iter()
        .zip(values)
        .map(|(name, cells)| Column::new(name, cells))
        .collect();
    let table = Table::new(columns).map_err(excel_err)?;
    Ok((table, sheet))
}

pub fn import(bytes: &[u8], filename: &str, sheet: Option<&str>) -> Result<ImportedTable, FetchError> {
    let (table, sheet) = read_sheet(bytes, sheet)?;
    let mut source = SourceInfo::new(SourceKind::Excel, Some(filename.to_string()));
    source.sheet = Some(sheet);
    Ok(ImportedTable { table, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_dates() {
        let dt = serial_to_datetime(45292.5).unwrap();
        assert_eq!(dt.to_string(), "2024-01-01 12:00:00");
        assert_eq!(serial_to_datetime(1.0).unwrap().to_string(), "1899-12-31 00:00:00");
    }

    #[test]
    fn test_cell_conversion() {
        assert_eq!(to_cell(&Data::Empty), Cell::Null);
        assert_eq!(to_cell(&Data::String(String::new())), Cell::Null);
        assert_eq!(to_cell(&Data::Int(3)), Cell::Int(3));
        assert_eq!(to_cell(&Data::String("x".into())), Cell::Text("x".into()));
        assert_eq!(header_text(&Data::Float(2.0)), "2.0");
    }

    #[test]
    fn test_garbage_bytes_are_an_excel_error() {
        assert!(matches!(sheet_names(b"not a workbook"), Err(FetchError::Excel(_))));
    }
}
