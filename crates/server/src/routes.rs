use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use common::types::{Health, Page};
use models::{Params, UpdateParams};
use serde::Deserialize;
use serde_json::{json, Value};
use service::{DataService, Mapper};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::errors::JsonApiError;

/// Dynamic-record service for one model.
pub type ModelService<M> = DataService<Params, M>;

/// One service per registered model, keyed by model name.
pub struct AppState<M> {
    services: Arc<BTreeMap<String, Arc<ModelService<M>>>>,
}

impl<M> Clone for AppState<M> {
    fn clone(&self) -> Self {
        Self { services: Arc::clone(&self.services) }
    }
}

impl<M: Mapper> AppState<M> {
    pub fn new(services: BTreeMap<String, Arc<ModelService<M>>>) -> Self {
        Self { services: Arc::new(services) }
    }

    pub fn model_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    fn service(&self, model: &str) -> Result<Arc<ModelService<M>>, JsonApiError> {
        self.services.get(model).cloned().ok_or_else(|| JsonApiError::unknown_model(model))
    }
}

fn affected(n: u64) -> Json<Value> {
    Json(json!({ "affected": n }))
}

async fn health<M: Mapper + 'static>(State(state): State<AppState<M>>) -> Json<Health> {
    Json(Health::ok(state.model_names()))
}

async fn save<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Params>,
) -> Result<Json<Value>, JsonApiError> {
    Ok(affected(state.service(&model)?.save_params(body).await?))
}

async fn batch_save<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Vec<Params>>,
) -> Result<Json<Value>, JsonApiError> {
    Ok(affected(state.service(&model)?.batch_save_chunked(&body).await?))
}

async fn update<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<UpdateParams>,
) -> Result<Json<Value>, JsonApiError> {
    Ok(affected(state.service(&model)?.update(body).await?))
}

async fn update_record<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Params>,
) -> Result<Json<Value>, JsonApiError> {
    Ok(affected(state.service(&model)?.update_record(&body).await?))
}

async fn delete<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Params>,
) -> Result<Json<Value>, JsonApiError> {
    Ok(affected(state.service(&model)?.delete(body).await?))
}

async fn select<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Params>,
) -> Result<Json<Option<Params>>, JsonApiError> {
    Ok(Json(state.service(&model)?.select(body).await?))
}

/// One page of rows plus the unpaged total.
async fn list<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Params>,
) -> Result<Json<Page<Params>>, JsonApiError> {
    let svc = state.service(&model)?;
    let total = svc.get_total(body.clone()).await?;
    let rows = svc.get_list(body).await?;
    Ok(Json(Page { rows, total }))
}

async fn nest_list<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Params>,
) -> Result<Json<Vec<Params>>, JsonApiError> {
    Ok(Json(state.service(&model)?.get_nest_list(body).await?))
}

async fn total<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Json(body): Json<Params>,
) -> Result<Json<Value>, JsonApiError> {
    let total = state.service(&model)?.get_total(body).await?;
    Ok(Json(json!({ "total": total })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportQuery {
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
}

fn default_header_rows() -> usize { 1 }

async fn import<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Query(q): Query<ImportQuery>,
    body: Bytes,
) -> Result<Json<Value>, JsonApiError> {
    Ok(affected(state.service(&model)?.import(&body, q.header_rows).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    #[serde(default)]
    pub file_name: String,
}

async fn export<M: Mapper + 'static>(
    State(state): State<AppState<M>>,
    Path(model): Path<String>,
    Query(q): Query<ExportQuery>,
    Json(rows): Json<Vec<Params>>,
) -> Result<impl IntoResponse, JsonApiError> {
    let book = state.service(&model)?.export(&q.file_name, &rows)?;
    let disposition = format!("attachment; filename=\"{0}\"; filename*=UTF-8''{0}", book.file_name);
    Ok((
        [(header::CONTENT_TYPE, book.content_type.to_string()), (header::CONTENT_DISPOSITION, disposition)],
        book.bytes,
    ))
}

/// Build the full application router: health plus the generic model routes.
pub fn build_router<M: Mapper + 'static>(state: AppState<M>, cors: CorsLayer) -> Router {
    let models = Router::new()
        .route("/api/:model/save", post(save::<M>))
        .route("/api/:model/batch-save", post(batch_save::<M>))
        .route("/api/:model/update", post(update::<M>))
        .route("/api/:model/update-record", post(update_record::<M>))
        .route("/api/:model/delete", post(delete::<M>))
        .route("/api/:model/select", post(select::<M>))
        .route("/api/:model/list", post(list::<M>))
        .route("/api/:model/nest-list", post(nest_list::<M>))
        .route("/api/:model/total", post(total::<M>))
        .route("/api/:model/import", post(import::<M>))
        .route("/api/:model/export", post(export::<M>));

    Router::new()
        .route("/health", get(health::<M>))
        .merge(models)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                // 5xx responses are logged at ERROR
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}
