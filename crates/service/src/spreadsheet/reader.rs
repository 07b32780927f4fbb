use std::io::Cursor;

use calamine::{Data, Range, Reader, Xls, Xlsx};
use serde_json::{Number, Value};
use tracing::warn;

use super::{SheetData, SpreadsheetReader};
use crate::errors::ServiceError;

/// Reads `.xlsx`, falling back to legacy `.xls`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalamineReader;

fn first_sheet<R>(workbook: &mut R) -> Result<Range<Data>, ServiceError>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: std::fmt::Display,
{
    match workbook.worksheet_range_at(0) {
        Some(Ok(range)) => Ok(range),
        Some(Err(e)) => Err(ServiceError::ImportFailed(format!("failed to read worksheet: {e}"))),
        None => Err(ServiceError::ImportFailed("workbook has no worksheet".into())),
    }
}

fn open(bytes: &[u8]) -> Result<Range<Data>, ServiceError> {
    let owned = bytes.to_vec();
    if let Ok(mut workbook) = Xlsx::new(Cursor::new(owned.clone())) {
        return first_sheet(&mut workbook);
    }
    let mut workbook: Xls<_> = Xls::new(Cursor::new(owned))
        .map_err(|e| ServiceError::ImportFailed(format!("not an Excel workbook: {e}")))?;
    first_sheet(&mut workbook)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Value::String(s.clone()),
        Data::Int(i) => Value::from(*i),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(t) => Value::String(t.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Value::from(dt.as_f64()),
        },
        Data::Error(e) => {
            warn!(error = ?e, "spreadsheet cell holds an error value");
            Value::Null
        }
    }
}

fn cell_text(cell: &Data) -> String {
    match cell_value(cell) {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

impl SpreadsheetReader for CalamineReader {
    fn read(&self, bytes: &[u8], header_rows: usize) -> Result<SheetData, ServiceError> {
        let range = open(bytes)?;
        let mut rows = range.rows();
        let mut headers = Vec::new();
        for _ in 0..header_rows {
            match rows.next() {
                Some(row) => headers = row.iter().map(cell_text).collect(),
                None => break,
            }
        }
        let rows = rows
            .map(|row| row.iter().map(cell_value).collect::<Vec<_>>())
            .filter(|row| row.iter().any(|v| !v.is_null()))
            .collect();
        Ok(SheetData { headers, rows })
    }
}
