//! Spreadsheet import/export glue.
//!
//! The codecs live behind two small traits so the data service never
//! touches a workbook format directly. `CalamineReader` and `XlsxWriter`
//! are the stock implementations.

use models::Params;
use serde_json::Value;

use crate::errors::ServiceError;

pub mod reader;
pub mod writer;

pub use reader::CalamineReader;
pub use writer::XlsxWriter;

pub const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// First worksheet of a workbook: the titles of the last header row and
/// the data rows below it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

pub trait SpreadsheetReader: Send + Sync {
    fn read(&self, bytes: &[u8], header_rows: usize) -> Result<SheetData, ServiceError>;
}

pub trait SpreadsheetWriter: Send + Sync {
    /// One header row of `titles`, then one row per record with the values under `keys`.
    fn write(&self, rows: &[Params], keys: &[String], titles: &[String]) -> Result<Vec<u8>, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct ExportedWorkbook {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Percent-encoded download name with an Excel extension.
pub fn export_file_name(file_name: &str, fallback_title: &str) -> Result<String, ServiceError> {
    let trimmed = file_name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::body_mismatch("file name required"));
    }
    let mut name = urlencoding::encode(trimmed).into_owned();
    if name.is_empty() {
        name = urlencoding::encode(fallback_title).into_owned();
    }
    let lower = name.to_ascii_lowercase();
    if !(lower.ends_with(".xlsx") || lower.ends_with(".xls")) {
        name.push_str(".xlsx");
    }
    Ok(name)
}
