//! Parameter filter & validation pipeline.
//!
//! Every data-service operation runs its input through a filter (normalize,
//! default, reject) and then a validation hook before anything reaches the
//! mapper. `ParamFilter` carries the stock behaviour in default methods;
//! a service that needs business rules implements the trait and overrides
//! the hooks it cares about.

use configs::UpdateFallback;
use models::params::{is_blank, now_timestamp, Params, UpdateParams};
use models::schema::{AttributeKind, ModelSchema};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::mapper::condition_attributes;
use crate::pagination::{Pagination, DEFAULT_PAGE_SIZE};

/// What a filter knows about the operation it is filtering.
#[derive(Clone, Copy, Debug)]
pub struct FilterContext<'a> {
    pub schema: &'a ModelSchema,
    pub default_page_size: u64,
    pub update_fallback: UpdateFallback,
}

impl<'a> FilterContext<'a> {
    pub fn new(schema: &'a ModelSchema) -> Self {
        Self { schema, default_page_size: DEFAULT_PAGE_SIZE, update_fallback: UpdateFallback::default() }
    }

    fn model(&self) -> &str { self.schema.name() }
}

pub(crate) fn render(params: &Params) -> String {
    serde_json::to_string(params).unwrap_or_default()
}

fn render_update(params: &UpdateParams) -> String {
    serde_json::to_string(params).unwrap_or_default()
}

/// Fresh identifier for a textual primary key.
pub fn generate_id(kind: AttributeKind) -> String {
    match kind {
        AttributeKind::Uuid => Uuid::new_v4().to_string(),
        _ => Uuid::new_v4().simple().to_string(),
    }
}

fn require_non_empty(ctx: &FilterContext<'_>, params: &Params, op: &str) -> Result<(), ServiceError> {
    if params.is_empty() {
        error!(model = %ctx.model(), op, "empty operation parameters");
        return Err(ServiceError::body_mismatch(format!("{op} parameters must not be empty")));
    }
    Ok(())
}

/// Match parameters must name at least one declared attribute; undeclared
/// and paging keys never become conditions.
fn require_conditions(ctx: &FilterContext<'_>, params: &Params, op: &str) -> Result<(), ServiceError> {
    require_non_empty(ctx, params, op)?;
    if condition_attributes(ctx.schema, params).is_empty() {
        error!(model = %ctx.model(), op, params = %render(params), "no declared attribute to match on");
        return Err(ServiceError::body_mismatch(format!("{op} parameters name no {} attribute", ctx.model())));
    }
    Ok(())
}

pub trait ParamFilter: Send + Sync {
    /// Generate a missing textual primary key and stamp the creation time.
    fn save_filter(&self, ctx: &FilterContext<'_>, mut params: Params) -> Result<Params, ServiceError> {
        let pk = ctx.schema.primary_key().ok_or_else(|| {
            error!(model = %ctx.model(), "model schema declares no primary key");
            ServiceError::missing_primary_key(ctx.model())
        })?;
        if is_blank(params.get(&pk.name)) && pk.kind.is_textual() {
            params.insert(pk.name.clone(), Value::String(generate_id(pk.kind)));
        }
        if let Some(created) = ctx.schema.created_at() {
            if is_blank(params.get(&created.name)) {
                params.insert(created.name.clone(), now_timestamp());
            }
        }
        Ok(params)
    }

    fn save_validate(&self, ctx: &FilterContext<'_>, params: &Params) -> bool {
        info!(model = %ctx.model(), params = %render(params), "save_params");
        true
    }

    /// Split a record's attributes into conditions and new values.
    ///
    /// With a primary-key value the key is the only condition; without one
    /// the configured `UpdateFallback` decides.
    fn normalize_update(&self, ctx: &FilterContext<'_>, mut record: Params) -> Result<UpdateParams, ServiceError> {
        let pk_name = ctx.schema.primary_key().map(|pk| pk.name.as_str());
        let identity = pk_name.and_then(|name| record.remove(name).map(|v| (name, v)));

        let normalized = match identity {
            Some((name, id)) if !is_blank(Some(&id)) => {
                let mut conditions = Params::new();
                conditions.insert(name.to_string(), id);
                UpdateParams::new(conditions, record)
            }
            _ => match ctx.update_fallback {
                UpdateFallback::MergeAttributes => UpdateParams::new(record.clone(), record),
                UpdateFallback::Reject => {
                    error!(model = %ctx.model(), "update without primary key value rejected");
                    return Err(ServiceError::body_mismatch("update requires a primary key value"));
                }
            },
        };
        warn!(model = %ctx.model(), params = %render_update(&normalized), "record update normalized to conditions/updates");
        Ok(normalized)
    }

    /// Stamp the update time and protect the creation time.
    fn update_filter(&self, ctx: &FilterContext<'_>, mut params: UpdateParams) -> Result<UpdateParams, ServiceError> {
        if params.is_empty() {
            error!(model = %ctx.model(), op = "update", "empty operation parameters");
            return Err(ServiceError::body_mismatch("update parameters must not be empty"));
        }
        if !params.conditions.is_empty() {
            require_conditions(ctx, &params.conditions, "update")?;
        }
        if let Some(updated) = ctx.schema.updated_at() {
            if is_blank(params.updates.get(&updated.name)) {
                params.updates.insert(updated.name.clone(), now_timestamp());
            }
        }
        if let Some(created) = ctx.schema.created_at() {
            params.updates.remove(&created.name);
        }
        Ok(params)
    }

    fn update_validate(&self, ctx: &FilterContext<'_>, params: &UpdateParams) -> bool {
        info!(model = %ctx.model(), params = %render_update(params), "update_params");
        if params.updates.is_empty() {
            warn!(model = %ctx.model(), "update carries no new values; check the caller");
        }
        if params.conditions.is_empty() {
            warn!(model = %ctx.model(), "update carries no conditions and will match every row");
        }
        true
    }

    fn delete_filter(&self, ctx: &FilterContext<'_>, params: Params) -> Result<Params, ServiceError> {
        require_conditions(ctx, &params, "delete")?;
        Ok(params)
    }

    fn delete_validate(&self, ctx: &FilterContext<'_>, params: &Params) -> bool {
        info!(model = %ctx.model(), params = %render(params), "delete_params");
        true
    }

    fn select_filter(&self, ctx: &FilterContext<'_>, params: Params) -> Result<Params, ServiceError> {
        require_conditions(ctx, &params, "select")?;
        Ok(params)
    }

    fn select_validate(&self, ctx: &FilterContext<'_>, params: &Params) -> bool {
        info!(model = %ctx.model(), params = %render(params), "select_params");
        true
    }

    /// Rewrite `pageIndex`/`pageSize` to offset/limit.
    fn list_filter(&self, ctx: &FilterContext<'_>, mut params: Params) -> Result<Params, ServiceError> {
        Pagination::from_params(&params, ctx.default_page_size).apply(&mut params);
        Ok(params)
    }

    fn list_validate(&self, ctx: &FilterContext<'_>, params: &Params) -> bool {
        info!(model = %ctx.model(), params = %render(params), "list_params");
        true
    }
}

/// Stock pipeline with no extra business rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultParamFilter;

impl ParamFilter for DefaultParamFilter {}
