//! Offset/limit pagination read from operation parameters.
//!
//! `pageIndex` is 1-based on input; the list filter rewrites it to the
//! zero-based row offset the mapper consumes.

use models::params::{Params, PAGE_INDEX, PAGE_SIZE};
use serde_json::Value;
use tracing::warn;

/// Page size used when none is configured.
pub const DEFAULT_PAGE_SIZE: u64 = 10;

/// Pagination parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    /// 1-based page index
    pub page: u64,
    /// items per page
    pub per_page: u64,
}

enum PageValue {
    Missing,
    Valid(u64),
    Malformed,
}

fn read_page_value(value: Option<&Value>) -> PageValue {
    let parsed = match value {
        None | Some(Value::Null) => return PageValue::Missing,
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(_) => None,
    };
    match parsed {
        Some(n) if n > 0 => PageValue::Valid(n as u64),
        _ => PageValue::Malformed,
    }
}

impl Pagination {
    /// Read `pageIndex`/`pageSize`; anything missing, unparsable or non-positive
    /// falls back to page 1 and `default_per_page`.
    pub fn from_params(params: &Params, default_per_page: u64) -> Self {
        let page = match read_page_value(params.get(PAGE_INDEX)) {
            PageValue::Valid(n) => n,
            PageValue::Missing => 1,
            PageValue::Malformed => {
                warn!(value = ?params.get(PAGE_INDEX), "malformed pageIndex, using 1");
                1
            }
        };
        let per_page = match read_page_value(params.get(PAGE_SIZE)) {
            PageValue::Valid(n) => n,
            PageValue::Missing => default_per_page,
            PageValue::Malformed => {
                warn!(value = ?params.get(PAGE_SIZE), default = default_per_page, "malformed pageSize, using default");
                default_per_page
            }
        };
        Self { page, per_page }
    }

    /// Zero-based row offset of the first row on this page.
    pub fn offset(self) -> u64 {
        (self.page.max(1) - 1).saturating_mul(self.per_page)
    }

    /// Write offset/limit back under the paging keys.
    pub fn apply(self, params: &mut Params) {
        params.insert(PAGE_INDEX.to_string(), Value::from(self.offset()));
        params.insert(PAGE_SIZE.to_string(), Value::from(self.per_page));
    }
}

impl Default for Pagination {
    fn default() -> Self { Self { page: 1, per_page: DEFAULT_PAGE_SIZE } }
}

/// Offset and limit previously written by `Pagination::apply`, if any.
pub fn offset_limit(params: &Params) -> (Option<u64>, Option<u64>) {
    let read = |key: &str| params.get(key).and_then(Value::as_u64);
    (read(PAGE_INDEX), read(PAGE_SIZE))
}
