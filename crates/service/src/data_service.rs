//! Generic per-model data service.
//!
//! Composes a schema, a `ParamFilter` and a `Mapper`. Every operation runs
//! filter, then validation, then dispatch; nothing reaches the mapper until
//! the parameters are canonical.

use std::marker::PhantomData;
use std::sync::Arc;

use configs::{CrudConfig, UpdateFallback};
use models::params::{from_params, is_blank, to_params};
use models::{AttributeDescriptor, ModelSchema, Params, UpdateParams};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument};

use crate::errors::ServiceError;
use crate::filter::{DefaultParamFilter, FilterContext, ParamFilter};
use crate::mapper::Mapper;
use crate::pagination::DEFAULT_PAGE_SIZE;
use crate::spreadsheet::{
    export_file_name, CalamineReader, ExportedWorkbook, SpreadsheetReader, SpreadsheetWriter, XlsxWriter,
    XLSX_CONTENT_TYPE,
};

pub const DEFAULT_BATCH_SIZE: usize = 25;

pub struct DataService<T, M, F = DefaultParamFilter> {
    schema: Arc<ModelSchema>,
    mapper: Arc<M>,
    filter: F,
    batch_size: usize,
    default_page_size: u64,
    update_fallback: UpdateFallback,
    reader: Arc<dyn SpreadsheetReader>,
    writer: Arc<dyn SpreadsheetWriter>,
    _record: PhantomData<fn() -> T>,
}

impl<T, M> DataService<T, M, DefaultParamFilter> {
    pub fn new(schema: Arc<ModelSchema>, mapper: Arc<M>) -> Self {
        Self::with_filter(schema, mapper, DefaultParamFilter)
    }
}

impl<T, M, F> DataService<T, M, F> {
    /// Service with custom business rules in place of the stock pipeline.
    pub fn with_filter(schema: Arc<ModelSchema>, mapper: Arc<M>, filter: F) -> Self {
        Self {
            schema,
            mapper,
            filter,
            batch_size: DEFAULT_BATCH_SIZE,
            default_page_size: DEFAULT_PAGE_SIZE,
            update_fallback: UpdateFallback::default(),
            reader: Arc::new(CalamineReader),
            writer: Arc::new(XlsxWriter),
            _record: PhantomData,
        }
    }

    pub fn with_config(mut self, cfg: &CrudConfig) -> Self {
        self.batch_size = cfg.batch_size.max(1);
        self.default_page_size = cfg.default_page_size.max(1);
        self.update_fallback = cfg.update_fallback;
        self
    }

    pub fn with_spreadsheet(mut self, reader: Arc<dyn SpreadsheetReader>, writer: Arc<dyn SpreadsheetWriter>) -> Self {
        self.reader = reader;
        self.writer = writer;
        self
    }

    pub fn schema(&self) -> &Arc<ModelSchema> { &self.schema }

    pub fn mapper(&self) -> &Arc<M> { &self.mapper }

    fn ctx(&self) -> FilterContext<'_> {
        FilterContext {
            schema: &self.schema,
            default_page_size: self.default_page_size,
            update_fallback: self.update_fallback,
        }
    }

    fn model(&self) -> &str { self.schema.name() }

    fn rejected(&self, op: &str) -> ServiceError {
        error!(model = %self.model(), op, "validation rejected parameters");
        ServiceError::body_mismatch(format!("{op} validation failed"))
    }

    fn mapper_failed(&self, op: &str, e: ServiceError) -> ServiceError {
        error!(model = %self.model(), op, error = %e, "mapper call failed");
        e
    }

    fn identity(&self, id: &str) -> Result<Params, ServiceError> {
        let pk = self.schema.primary_key().ok_or_else(|| ServiceError::missing_primary_key(self.model()))?;
        let mut params = Params::new();
        params.insert(pk.name.clone(), Value::String(id.to_string()));
        Ok(params)
    }
}

impl<T, M, F> DataService<T, M, F>
where
    T: Serialize + DeserializeOwned + Send + Sync,
    M: Mapper,
    F: ParamFilter,
{
    fn record_params(&self, record: &T) -> Result<Params, ServiceError> {
        to_params(record).map_err(|e| ServiceError::ServerConfiguration(format!("{}: {e}", self.model())))
    }

    fn build_record(&self, params: Params) -> Result<T, ServiceError> {
        from_params(params).map_err(|e| ServiceError::ServerConfiguration(format!("cannot build {} record: {e}", self.model())))
    }

    /// Insert the record, or update it when a row with its primary key already exists.
    ///
    /// # Examples
    /// ```
    /// use std::sync::Arc;
    /// use models::{AttributeDescriptor, ModelSchema, Params};
    /// use service::{DataService, MemoryMapper};
    /// use serde_json::json;
    ///
    /// let schema = ModelSchema::builder("tag")
    ///     .attribute(AttributeDescriptor::string("id"))
    ///     .attribute(AttributeDescriptor::string("label"))
    ///     .primary_key("id")
    ///     .build()
    ///     .unwrap();
    /// let mapper = Arc::new(MemoryMapper::new());
    /// let svc: DataService<Params, _> = DataService::new(Arc::new(schema), mapper.clone());
    /// let tag = json!({"label": "rust"}).as_object().cloned().unwrap();
    /// assert_eq!(tokio_test::block_on(svc.save(&tag)).unwrap(), 1);
    /// assert_eq!(mapper.rows("tag")[0]["id"].as_str().unwrap().len(), 32);
    /// ```
    #[instrument(skip_all, fields(model = %self.schema.name()))]
    pub async fn save(&self, record: &T) -> Result<u64, ServiceError> {
        let params = self.record_params(record)?;
        if let Some(pk) = self.schema.primary_key() {
            if let Some(id) = params.get(&pk.name).filter(|v| !is_blank(Some(*v))) {
                let mut key = Params::new();
                key.insert(pk.name.clone(), id.clone());
                let existing = self.mapper.select(&self.schema, key).await.map_err(|e| self.mapper_failed("save", e))?;
                if existing.is_some() {
                    debug!(model = %self.model(), "row exists, saving as update");
                    let normalized = self.filter.normalize_update(&self.ctx(), params)?;
                    return self.update(normalized).await;
                }
            }
        }
        let ctx = self.ctx();
        let params = self.filter.save_filter(&ctx, params)?;
        if !self.filter.save_validate(&ctx, &params) {
            return Err(self.rejected("save"));
        }
        self.mapper.save(&self.schema, params).await.map_err(|e| self.mapper_failed("save", e))
    }

    /// Build the record from a mapping, then `save` it.
    pub async fn save_params(&self, params: Params) -> Result<u64, ServiceError> {
        let record = self.build_record(params)?;
        self.save(&record).await
    }

    /// Save filter and validation for every record, before any is written.
    fn prepare_batch(&self, records: &[T], op: &str) -> Result<Vec<Params>, ServiceError> {
        let ctx = self.ctx();
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            let params = self.filter.save_filter(&ctx, self.record_params(record)?)?;
            if !self.filter.save_validate(&ctx, &params) {
                return Err(self.rejected(op));
            }
            batch.push(params);
        }
        Ok(batch)
    }

    /// One mapper call for all records; no existence check.
    #[instrument(skip_all, fields(model = %self.schema.name(), count = records.len()))]
    pub async fn batch_save(&self, records: &[T]) -> Result<u64, ServiceError> {
        if records.is_empty() {
            return Ok(0);
        }
        let batch = self.prepare_batch(records, "batch_save")?;
        self.mapper.batch_save(&self.schema, batch).await.map_err(|e| self.mapper_failed("batch_save", e))
    }

    /// `batch_save` in sequential chunks of the configured batch size. The
    /// chunks are written as one unit: if any fails, none is kept.
    #[instrument(skip_all, fields(model = %self.schema.name(), count = records.len()))]
    pub async fn batch_save_chunked(&self, records: &[T]) -> Result<u64, ServiceError> {
        if records.is_empty() {
            return Ok(0);
        }
        let batch = self.prepare_batch(records, "batch_save")?;
        let chunks: Vec<Vec<Params>> = batch.chunks(self.batch_size.max(1)).map(<[Params]>::to_vec).collect();
        let saved = self
            .mapper
            .batch_save_chunks(&self.schema, chunks)
            .await
            .map_err(|e| self.mapper_failed("batch_save_chunked", e))?;
        info!(model = %self.model(), records = records.len(), saved, "batch_save_chunked");
        Ok(saved)
    }

    #[instrument(skip_all, fields(model = %self.schema.name()))]
    pub async fn update(&self, params: UpdateParams) -> Result<u64, ServiceError> {
        let ctx = self.ctx();
        let params = self.filter.update_filter(&ctx, params)?;
        if !self.filter.update_validate(&ctx, &params) {
            return Err(self.rejected("update"));
        }
        self.mapper.update(&self.schema, params).await.map_err(|e| self.mapper_failed("update", e))
    }

    /// Update by the record's primary key; see `ParamFilter::normalize_update`.
    pub async fn update_record(&self, record: &T) -> Result<u64, ServiceError> {
        let params = self.record_params(record)?;
        let normalized = self.filter.normalize_update(&self.ctx(), params)?;
        self.update(normalized).await
    }

    pub async fn update_by_id(&self, id: &str, updates: Params) -> Result<u64, ServiceError> {
        if id.is_empty() {
            return Err(ServiceError::body_mismatch("id required"));
        }
        self.update(UpdateParams::new(self.identity(id)?, updates)).await
    }

    #[instrument(skip_all, fields(model = %self.schema.name()))]
    pub async fn delete(&self, params: Params) -> Result<u64, ServiceError> {
        let ctx = self.ctx();
        let params = self.filter.delete_filter(&ctx, params)?;
        if !self.filter.delete_validate(&ctx, &params) {
            return Err(self.rejected("delete"));
        }
        self.mapper.delete(&self.schema, params).await.map_err(|e| self.mapper_failed("delete", e))
    }

    pub async fn delete_record(&self, record: &T) -> Result<u64, ServiceError> {
        self.delete(self.record_params(record)?).await
    }

    pub async fn delete_by_id(&self, id: &str) -> Result<u64, ServiceError> {
        if id.is_empty() {
            return Err(ServiceError::body_mismatch("id required"));
        }
        self.delete(self.identity(id)?).await
    }

    #[instrument(skip_all, fields(model = %self.schema.name()))]
    pub async fn select(&self, params: Params) -> Result<Option<T>, ServiceError> {
        let ctx = self.ctx();
        let params = self.filter.select_filter(&ctx, params)?;
        if !self.filter.select_validate(&ctx, &params) {
            return Err(self.rejected("select"));
        }
        let row = self.mapper.select(&self.schema, params).await.map_err(|e| self.mapper_failed("select", e))?;
        row.map(|r| self.build_record(r)).transpose()
    }

    pub async fn select_record(&self, record: &T) -> Result<Option<T>, ServiceError> {
        self.select(self.record_params(record)?).await
    }

    /// `None` for an empty id, without a mapper call.
    pub async fn select_by_id(&self, id: &str) -> Result<Option<T>, ServiceError> {
        if id.is_empty() {
            return Ok(None);
        }
        self.select(self.identity(id)?).await
    }

    async fn filtered_list(&self, params: Params) -> Result<Params, ServiceError> {
        let ctx = self.ctx();
        let params = self.filter.list_filter(&ctx, params)?;
        if !self.filter.list_validate(&ctx, &params) {
            return Err(self.rejected("list"));
        }
        Ok(params)
    }

    /// One page of raw rows.
    #[instrument(skip_all, fields(model = %self.schema.name()))]
    pub async fn get_list(&self, params: Params) -> Result<Vec<Params>, ServiceError> {
        let params = self.filtered_list(params).await?;
        self.mapper.get_list(&self.schema, params).await.map_err(|e| self.mapper_failed("get_list", e))
    }

    pub async fn get_list_record(&self, record: &T) -> Result<Vec<Params>, ServiceError> {
        self.get_list(self.record_params(record)?).await
    }

    /// One page of typed records.
    #[instrument(skip_all, fields(model = %self.schema.name()))]
    pub async fn get_nest_list(&self, params: Params) -> Result<Vec<T>, ServiceError> {
        let params = self.filtered_list(params).await?;
        let rows = self
            .mapper
            .get_nest_list(&self.schema, params)
            .await
            .map_err(|e| self.mapper_failed("get_nest_list", e))?;
        rows.into_iter().map(|r| self.build_record(r)).collect()
    }

    pub async fn get_nest_list_record(&self, record: &T) -> Result<Vec<T>, ServiceError> {
        self.get_nest_list(self.record_params(record)?).await
    }

    /// Count of matching rows; paging keys are ignored.
    pub async fn get_total(&self, params: Params) -> Result<u64, ServiceError> {
        self.mapper.get_total(&self.schema, params).await.map_err(|e| self.mapper_failed("get_total", e))
    }

    /// Read the first worksheet and save its rows in chunks.
    ///
    /// Headers are matched to attributes by title, then by name; with no
    /// header rows, columns follow the exportable attributes in order.
    #[instrument(skip_all, fields(model = %self.schema.name(), bytes = bytes.len(), header_rows = header_rows))]
    pub async fn import(&self, bytes: &[u8], header_rows: usize) -> Result<u64, ServiceError> {
        let sheet = self.reader.read(bytes, header_rows).map_err(|e| match e {
            ServiceError::ImportFailed(_) => e,
            other => ServiceError::ImportFailed(other.to_string()),
        })?;
        let columns: Vec<Option<&AttributeDescriptor>> = if header_rows == 0 {
            self.schema.exportable_attributes().map(Some).collect()
        } else {
            sheet
                .headers
                .iter()
                .map(|h| {
                    let attr = self.schema.attribute_for_header(h);
                    if attr.is_none() && !h.is_empty() {
                        debug!(model = %self.model(), header = %h, "unmapped spreadsheet column");
                    }
                    attr
                })
                .collect()
        };

        let mut records = Vec::with_capacity(sheet.rows.len());
        for (i, row) in sheet.rows.into_iter().enumerate() {
            let mut params = Params::new();
            for (attr, cell) in columns.iter().zip(row) {
                if let Some(attr) = attr {
                    let value = attr.kind.coerce(cell);
                    if !value.is_null() {
                        params.insert(attr.name.clone(), value);
                    }
                }
            }
            if params.is_empty() {
                continue;
            }
            let record = from_params(params).map_err(|e| {
                ServiceError::ImportFailed(format!("row {}: {e}", i + header_rows + 1))
            })?;
            records.push(record);
        }
        info!(model = %self.model(), rows = records.len(), "import_rows_read");
        self.batch_save_chunked(&records).await
    }

    /// Write `rows` to a workbook of the exportable attributes.
    #[instrument(skip_all, fields(model = %self.schema.name(), rows = rows.len()))]
    pub fn export(&self, file_name: &str, rows: &[Params]) -> Result<ExportedWorkbook, ServiceError> {
        let file_name = export_file_name(file_name, self.schema.title())?;
        let (keys, titles): (Vec<String>, Vec<String>) = self
            .schema
            .exportable_attributes()
            .map(|a| (a.name.clone(), a.display_title().to_string()))
            .unzip();
        let bytes = self.writer.write(rows, &keys, &titles).map_err(|e| {
            error!(model = %self.model(), error = %e, "export failed");
            match e {
                ServiceError::ExportFailed(_) => e,
                other => ServiceError::ExportFailed(other.to_string()),
            }
        })?;
        Ok(ExportedWorkbook { file_name, content_type: XLSX_CONTENT_TYPE, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{MapperCall, MemoryMapper};
    use crate::spreadsheet::SheetData;
    use crate::test_support::{article_schema, article_service, Article};
    use serde_json::json;

    fn params(v: Value) -> Params { v.as_object().cloned().unwrap() }

    fn last_update(mapper: &MemoryMapper) -> UpdateParams {
        mapper
            .calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                MapperCall::Update(u) => Some(u),
                _ => None,
            })
            .expect("update call")
    }

    #[tokio::test]
    async fn save_generates_id_and_created_at() {
        let (svc, mapper) = article_service();
        let before = chrono::Utc::now() - chrono::Duration::milliseconds(1);
        let record = Article { id: Some(String::new()), ..Article::titled("hello") };
        assert_eq!(svc.save(&record).await.unwrap(), 1);

        let calls = mapper.calls();
        assert_eq!(calls.len(), 1, "blank id must not trigger an existence check");
        let MapperCall::Save(saved) = &calls[0] else { panic!("expected save, got {calls:?}") };
        assert_eq!(saved["id"].as_str().unwrap().len(), 32);
        let created = chrono::DateTime::parse_from_rfc3339(saved["createdAt"].as_str().unwrap()).unwrap();
        assert!(created >= before);
    }

    #[tokio::test]
    async fn save_of_existing_row_becomes_update() {
        let (svc, mapper) = article_service();
        svc.save(&Article { id: Some("a1".into()), ..Article::titled("first") }).await.unwrap();
        svc.save(&Article { id: Some("a1".into()), ..Article::titled("second") }).await.unwrap();

        let rows = mapper.rows("article");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], json!("second"));
        assert!(rows[0].contains_key("updatedAt"));
    }

    #[tokio::test]
    async fn update_record_with_id_conditions_on_key() {
        let (svc, mapper) = article_service();
        svc.update_record(&Article { id: Some("5".into()), ..Article::titled("x") }).await.unwrap();

        let up = last_update(&mapper);
        assert_eq!(up.conditions, params(json!({"id": "5"})));
        let mut keys: Vec<_> = up.updates.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["title".to_string(), "updatedAt".to_string()]);
    }

    #[tokio::test]
    async fn update_record_without_id_merges_attributes() {
        let (svc, mapper) = article_service();
        svc.update_record(&Article::titled("x")).await.unwrap();

        let up = last_update(&mapper);
        assert_eq!(up.conditions, params(json!({"title": "x"})));
        assert_eq!(up.updates["title"], json!("x"));
        assert!(up.updates["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn update_record_without_id_can_be_rejected() {
        let mapper = Arc::new(MemoryMapper::new());
        let cfg = CrudConfig { update_fallback: UpdateFallback::Reject, ..CrudConfig::default() };
        let svc: DataService<Article, _> = DataService::new(Arc::new(article_schema()), mapper.clone()).with_config(&cfg);
        let err = svc.update_record(&Article::titled("x")).await.unwrap_err();
        assert!(matches!(err, ServiceError::BodyMismatch(_)));
        assert!(mapper.calls().is_empty());
    }

    #[tokio::test]
    async fn chunked_batch_save_splits_into_configured_sizes() {
        let (svc, mapper) = article_service();
        let records: Vec<_> = (0..60).map(|i| Article::titled(&format!("t{i}"))).collect();
        assert_eq!(svc.batch_save_chunked(&records).await.unwrap(), 60);
        assert_eq!(mapper.batch_sizes(), vec![25, 25, 10]);
        assert!(mapper.rows("article").iter().all(|r| r.contains_key("id") && r.contains_key("createdAt")));
    }

    #[tokio::test]
    async fn empty_parameters_never_reach_the_mapper() {
        let (svc, mapper) = article_service();
        assert!(matches!(svc.update(UpdateParams::default()).await, Err(ServiceError::BodyMismatch(_))));
        assert!(matches!(svc.delete(Params::new()).await, Err(ServiceError::BodyMismatch(_))));
        assert!(matches!(svc.select(Params::new()).await, Err(ServiceError::BodyMismatch(_))));
        assert!(svc.select_by_id("").await.unwrap().is_none());
        assert!(mapper.calls().is_empty());
    }

    #[tokio::test]
    async fn list_pages_and_total_counts() {
        let (svc, mapper) = article_service();
        let records: Vec<_> = (1..=12)
            .map(|i| Article { id: Some(format!("{i:02}")), view_count: Some(i), ..Article::titled("t") })
            .collect();
        svc.batch_save(&records).await.unwrap();

        let page = svc.get_nest_list(params(json!({"title": "t", "pageIndex": 2}))).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id.as_deref(), Some("11"));

        let raw = svc.get_list(params(json!({"pageIndex": "1", "pageSize": "5"}))).await.unwrap();
        assert_eq!(raw.len(), 5);
        assert!(matches!(mapper.calls().last(), Some(MapperCall::List(p)) if p["pageIndex"] == json!(0)));

        assert_eq!(svc.get_total(params(json!({"title": "t", "pageIndex": 2}))).await.unwrap(), 12);
    }

    #[tokio::test]
    async fn by_id_helpers_round_trip() {
        let (svc, _) = article_service();
        svc.save(&Article { id: Some("k".into()), ..Article::titled("one") }).await.unwrap();
        assert_eq!(svc.update_by_id("k", params(json!({"viewCount": 9}))).await.unwrap(), 1);
        let found = svc.select_by_id("k").await.unwrap().unwrap();
        assert_eq!(found.view_count, Some(9));
        assert_eq!(svc.delete_by_id("k").await.unwrap(), 1);
        assert!(svc.select_by_id("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_with_only_unknown_keys_keeps_every_row() {
        let (svc, mapper) = article_service();
        let records: Vec<_> = (0..3).map(|i| Article::titled(&format!("t{i}"))).collect();
        svc.batch_save(&records).await.unwrap();

        assert!(matches!(svc.delete(params(json!({"titel": "typo"}))).await, Err(ServiceError::BodyMismatch(_))));
        assert!(matches!(svc.delete(params(json!({"pageIndex": 1}))).await, Err(ServiceError::BodyMismatch(_))));
        assert!(matches!(svc.select(params(json!({"bogus": 1}))).await, Err(ServiceError::BodyMismatch(_))));
        let typo = UpdateParams::new(params(json!({"titel": "t0"})), params(json!({"title": "x"})));
        assert!(matches!(svc.update(typo).await, Err(ServiceError::BodyMismatch(_))));
        assert_eq!(mapper.rows("article").len(), 3);
        assert!(mapper.rows("article").iter().all(|r| r["title"] != json!("x")));
    }

    #[tokio::test]
    async fn failed_chunk_rolls_back_the_whole_chunked_save() {
        let (svc, mapper) = article_service();
        svc.save(&Article { id: Some("dup".into()), ..Article::titled("first") }).await.unwrap();

        let records: Vec<_> = (0..30)
            .map(|i| {
                let id = if i == 27 { "dup".to_string() } else { format!("r{i}") };
                Article { id: Some(id), ..Article::titled("t") }
            })
            .collect();
        assert!(matches!(svc.batch_save_chunked(&records).await, Err(ServiceError::Db(_))));
        assert_eq!(mapper.rows("article").len(), 1);
        assert_eq!(mapper.batch_sizes(), vec![25, 5]);
    }

    #[tokio::test]
    async fn select_ignores_paging_keys() {
        let (svc, _) = article_service();
        svc.save(&Article { id: Some("a1".into()), ..Article::titled("one") }).await.unwrap();
        let found = svc.select(params(json!({"id": "a1", "pageIndex": 3}))).await.unwrap();
        assert_eq!(found.and_then(|a| a.id).as_deref(), Some("a1"));
    }

    /// Turns down everything at the validation stage.
    struct RejectingFilter;

    impl ParamFilter for RejectingFilter {
        fn save_validate(&self, _: &FilterContext<'_>, _: &Params) -> bool { false }
        fn update_validate(&self, _: &FilterContext<'_>, _: &UpdateParams) -> bool { false }
        fn delete_validate(&self, _: &FilterContext<'_>, _: &Params) -> bool { false }
        fn select_validate(&self, _: &FilterContext<'_>, _: &Params) -> bool { false }
        fn list_validate(&self, _: &FilterContext<'_>, _: &Params) -> bool { false }
    }

    #[tokio::test]
    async fn custom_validation_blocks_every_operation() {
        let mapper = Arc::new(MemoryMapper::new());
        let svc: DataService<Article, _, RejectingFilter> =
            DataService::with_filter(Arc::new(article_schema()), mapper.clone(), RejectingFilter);
        let article = Article::titled("x");
        let rejected = |r: Result<_, ServiceError>| matches!(r, Err(ServiceError::BodyMismatch(_)));

        assert!(rejected(svc.save(&article).await.map(|_| ())));
        assert!(rejected(svc.batch_save(&[Article::titled("a"), Article::titled("b")]).await.map(|_| ())));
        assert!(rejected(svc.batch_save_chunked(&[Article::titled("a")]).await.map(|_| ())));
        assert!(rejected(svc.update_by_id("k", params(json!({"title": "y"}))).await.map(|_| ())));
        assert!(rejected(svc.update_record(&Article { id: Some("k".into()), ..article.clone() }).await.map(|_| ())));
        assert!(rejected(svc.delete(params(json!({"title": "x"}))).await.map(|_| ())));
        assert!(rejected(svc.select(params(json!({"title": "x"}))).await.map(|_| ())));
        assert!(rejected(svc.get_list(params(json!({"title": "x"}))).await.map(|_| ())));
        assert!(rejected(svc.get_nest_list(Params::new()).await.map(|_| ())));
        assert!(mapper.calls().is_empty());
    }

    /// Adds a fixed attribute on save, leaving the rest of the pipeline stock.
    struct DraftFilter;

    impl ParamFilter for DraftFilter {
        fn save_filter(&self, ctx: &FilterContext<'_>, params: Params) -> Result<Params, ServiceError> {
            let mut params = DefaultParamFilter.save_filter(ctx, params)?;
            params.insert("title".into(), json!("draft"));
            Ok(params)
        }
    }

    #[tokio::test]
    async fn custom_save_filter_rewrites_parameters() {
        let mapper = Arc::new(MemoryMapper::new());
        let svc = DataService::with_filter(Arc::new(article_schema()), mapper.clone(), DraftFilter);
        svc.save(&Article::titled("x")).await.unwrap();
        let rows = mapper.rows("article");
        assert_eq!(rows[0]["title"], json!("draft"));
        assert_eq!(rows[0]["id"].as_str().map(str::len), Some(32));
    }

    struct FixedSheet(SheetData);

    impl SpreadsheetReader for FixedSheet {
        fn read(&self, _: &[u8], _: usize) -> Result<SheetData, ServiceError> { Ok(self.0.clone()) }
    }

    struct BrokenWriter;

    impl SpreadsheetWriter for BrokenWriter {
        fn write(&self, _: &[Params], _: &[String], _: &[String]) -> Result<Vec<u8>, ServiceError> {
            Err(ServiceError::ExportFailed("disk full".into()))
        }
    }

    #[tokio::test]
    async fn import_maps_headers_and_coerces_cells() {
        let sheet = SheetData {
            headers: vec!["Title".into(), "Views".into(), "Ignored".into()],
            rows: vec![
                vec![json!("a"), json!("7"), json!("x")],
                vec![Value::Null, Value::Null, Value::Null],
                vec![json!("b"), json!(3.0), Value::Null],
            ],
        };
        let mapper = Arc::new(MemoryMapper::new());
        let svc: DataService<Article, _> = DataService::new(Arc::new(article_schema()), mapper.clone())
            .with_spreadsheet(Arc::new(FixedSheet(sheet)), Arc::new(XlsxWriter));
        assert_eq!(svc.import(b"ignored", 1).await.unwrap(), 2);

        let rows = mapper.rows("article");
        assert_eq!(rows[0]["viewCount"], json!(7));
        assert_eq!(rows[1]["viewCount"], json!(3));
        assert_eq!(mapper.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn import_of_garbage_fails() {
        let (svc, _) = article_service();
        assert!(matches!(svc.import(b"not a workbook", 1).await, Err(ServiceError::ImportFailed(_))));
    }

    #[tokio::test]
    async fn export_then_import_restores_rows() {
        let (svc, mapper) = article_service();
        let rows = vec![params(json!({"id": "1", "title": "a", "viewCount": 4}))];
        let book = svc.export("articles", &rows).unwrap();
        assert_eq!(book.file_name, "articles.xlsx");
        assert_eq!(book.content_type, XLSX_CONTENT_TYPE);

        assert_eq!(svc.import(&book.bytes, 1).await.unwrap(), 1);
        let saved = &mapper.rows("article")[0];
        assert_eq!(saved["title"], json!("a"));
        assert_eq!(saved["viewCount"], json!(4));
        assert_ne!(saved["id"], json!("1"), "hidden id column is not exported");
    }

    #[test]
    fn export_requires_a_file_name_and_surfaces_writer_failure() {
        let mapper = Arc::new(MemoryMapper::new());
        let svc: DataService<Article, _> = DataService::new(Arc::new(article_schema()), mapper)
            .with_spreadsheet(Arc::new(CalamineReader), Arc::new(BrokenWriter));
        assert!(matches!(svc.export("", &[]), Err(ServiceError::BodyMismatch(_))));
        assert!(matches!(svc.export("a", &[]), Err(ServiceError::ExportFailed(_))));
    }
}
