//! Persistence collaborator contract.
//!
//! A mapper receives the canonical parameters produced by the filter
//! pipeline together with the schema they belong to, so one mapper can
//! serve every registered model.

use async_trait::async_trait;
use models::{ModelSchema, Params, UpdateParams};

use crate::errors::ServiceError;

pub mod memory;
pub mod seaorm;

pub use memory::{MapperCall, MemoryMapper};
pub use seaorm::SeaOrmMapper;

#[async_trait]
pub trait Mapper: Send + Sync {
    /// Insert one row; returns rows affected.
    async fn save(&self, schema: &ModelSchema, record: Params) -> Result<u64, ServiceError>;

    /// Insert many rows at once; returns rows affected.
    async fn batch_save(&self, schema: &ModelSchema, records: Vec<Params>) -> Result<u64, ServiceError>;

    /// `batch_save` for each chunk, in order. Mappers over a transactional
    /// store override this so a failing chunk leaves no chunk written.
    async fn batch_save_chunks(&self, schema: &ModelSchema, chunks: Vec<Vec<Params>>) -> Result<u64, ServiceError> {
        let mut saved = 0;
        for chunk in chunks {
            saved += self.batch_save(schema, chunk).await?;
        }
        Ok(saved)
    }

    async fn update(&self, schema: &ModelSchema, params: UpdateParams) -> Result<u64, ServiceError>;

    async fn delete(&self, schema: &ModelSchema, params: Params) -> Result<u64, ServiceError>;

    /// At most one row; more than one match is an error.
    async fn select(&self, schema: &ModelSchema, params: Params) -> Result<Option<Params>, ServiceError>;

    /// One page of rows, honouring offset/limit written by the list filter.
    async fn get_list(&self, schema: &ModelSchema, params: Params) -> Result<Vec<Params>, ServiceError>;

    /// Rows shaped as full records. Mappers without nested projections reuse `get_list`.
    async fn get_nest_list(&self, schema: &ModelSchema, params: Params) -> Result<Vec<Params>, ServiceError> {
        self.get_list(schema, params).await
    }

    /// Unpaged count of matching rows.
    async fn get_total(&self, schema: &ModelSchema, params: Params) -> Result<u64, ServiceError>;
}

/// Parameters usable as match conditions: declared attributes only, paging keys excluded.
pub(crate) fn condition_attributes<'s, 'p>(
    schema: &'s ModelSchema,
    params: &'p Params,
) -> Vec<(&'s models::AttributeDescriptor, &'p serde_json::Value)> {
    use models::params::{PAGE_INDEX, PAGE_SIZE};
    params
        .iter()
        .filter(|(k, _)| k.as_str() != PAGE_INDEX && k.as_str() != PAGE_SIZE)
        .filter_map(|(k, v)| match schema.attribute(k) {
            Some(attr) => Some((attr, v)),
            None => {
                tracing::debug!(model = %schema.name(), key = %k, "ignoring undeclared parameter");
                None
            }
        })
        .collect()
}
