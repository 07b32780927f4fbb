use models::Params;
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use serde_json::Value;

use super::SpreadsheetWriter;
use crate::errors::ServiceError;

/// Single-sheet `.xlsx` writer with a bold header row.
#[derive(Debug, Clone, Copy, Default)]
pub struct XlsxWriter;

fn export_failed(e: XlsxError) -> ServiceError {
    ServiceError::ExportFailed(e.to_string())
}

fn column_index(col: usize) -> Result<u16, ServiceError> {
    u16::try_from(col).map_err(|_| ServiceError::ExportFailed(format!("column {col} exceeds the sheet width")))
}

/// Sheet row of data row `i`; row 0 holds the titles.
fn row_index(i: usize) -> Result<u32, ServiceError> {
    i.checked_add(1)
        .and_then(|r| u32::try_from(r).ok())
        .ok_or_else(|| ServiceError::ExportFailed(format!("row {i} exceeds the sheet height")))
}

impl SpreadsheetWriter for XlsxWriter {
    fn write(&self, rows: &[Params], keys: &[String], titles: &[String]) -> Result<Vec<u8>, ServiceError> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();

        for (col, title) in titles.iter().enumerate() {
            sheet.write_string_with_format(0, column_index(col)?, title, &bold).map_err(export_failed)?;
        }
        for (i, row) in rows.iter().enumerate() {
            let r = row_index(i)?;
            for (col, key) in keys.iter().enumerate() {
                let c = column_index(col)?;
                match row.get(key) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) => {
                        sheet.write_string(r, c, s).map_err(export_failed)?;
                    }
                    Some(Value::Bool(b)) => {
                        sheet.write_boolean(r, c, *b).map_err(export_failed)?;
                    }
                    Some(Value::Number(n)) => match n.as_f64() {
                        Some(f) => {
                            sheet.write_number(r, c, f).map_err(export_failed)?;
                        }
                        None => {
                            sheet.write_string(r, c, n.to_string()).map_err(export_failed)?;
                        }
                    },
                    Some(other) => {
                        sheet.write_string(r, c, other.to_string()).map_err(export_failed)?;
                    }
                }
            }
        }
        workbook.save_to_buffer().map_err(export_failed)
    }
}
