//! Record-side vocabulary of the CRUD layer: schema descriptors, the schema
//! registry, operation parameters and database connection helpers.

pub mod errors;
pub mod db;
pub mod schema;
pub mod registry;
pub mod params;
pub mod value;

pub use params::{Params, UpdateParams};
pub use registry::SchemaRegistry;
pub use schema::{AttributeDescriptor, AttributeKind, ModelSchema};
