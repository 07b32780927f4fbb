//! Service layer providing generic CRUD operations on top of models.
//! - Runs every operation through the parameter filter pipeline.
//! - Delegates persistence to a `Mapper` (SeaORM or in-memory).
//! - Provides clear error types and spreadsheet import/export glue.

pub mod errors;
pub mod pagination;
pub mod filter;
pub mod mapper;
pub mod data_service;
pub mod spreadsheet;
#[cfg(test)]
pub mod test_support;

pub use data_service::DataService;
pub use errors::ServiceError;
pub use filter::{DefaultParamFilter, FilterContext, ParamFilter};
pub use mapper::{Mapper, MapperCall, MemoryMapper, SeaOrmMapper};
pub use spreadsheet::{ExportedWorkbook, SpreadsheetReader, SpreadsheetWriter};
