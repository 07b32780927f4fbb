//! SeaORM-backed mapper.
//!
//! Statements are built with sea-query from the schema's column names, so
//! any registered model is served without a generated entity. Result rows
//! come back keyed by attribute name through `AS` aliases.

use async_trait::async_trait;
use models::value::parse_timestamp;
use models::{AttributeDescriptor, AttributeKind, ModelSchema, Params, UpdateParams};
use sea_orm::sea_query::{
    Alias, Asterisk, Condition, ConditionalStatement, DeleteStatement, Expr, InsertStatement, Order, Query,
    SelectStatement, SimpleExpr, UpdateStatement,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, FromQueryResult, JsonValue, TransactionTrait, Value as SeaValue};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{condition_attributes, Mapper};
use crate::errors::ServiceError;
use crate::pagination::offset_limit;

const TOTAL_ALIAS: &str = "total";

pub struct SeaOrmMapper<C = DatabaseConnection> {
    conn: C,
}

impl<C> SeaOrmMapper<C> {
    pub fn new(conn: C) -> Self { Self { conn } }

    pub fn connection(&self) -> &C { &self.conn }

    pub fn into_inner(self) -> C { self.conn }
}

fn mismatch(attr: &AttributeDescriptor, value: &Value) -> ServiceError {
    ServiceError::body_mismatch(format!("{} expects {:?}, got {value}", attr.name, attr.kind))
}

fn typed_null(kind: AttributeKind) -> SeaValue {
    match kind {
        AttributeKind::String => Option::<String>::None.into(),
        AttributeKind::Integer => Option::<i64>::None.into(),
        AttributeKind::Float => Option::<f64>::None.into(),
        AttributeKind::Boolean => Option::<bool>::None.into(),
        AttributeKind::Timestamp => Option::<chrono::DateTime<chrono::Utc>>::None.into(),
        AttributeKind::Uuid => Option::<Uuid>::None.into(),
        AttributeKind::Json => Option::<Value>::None.into(),
    }
}

/// Convert a parameter value into the database value its attribute kind binds as.
pub fn to_sea_value(attr: &AttributeDescriptor, value: &Value) -> Result<SeaValue, ServiceError> {
    let coerced = attr.kind.coerce(value.clone());
    if coerced.is_null() {
        return Ok(typed_null(attr.kind));
    }
    let converted: Option<SeaValue> = match attr.kind {
        AttributeKind::String => coerced.as_str().map(|s| s.to_string().into()),
        AttributeKind::Integer => coerced.as_i64().map(Into::into),
        AttributeKind::Float => coerced.as_f64().map(Into::into),
        AttributeKind::Boolean => coerced.as_bool().map(Into::into),
        AttributeKind::Timestamp => coerced.as_str().and_then(parse_timestamp).map(Into::into),
        AttributeKind::Uuid => coerced.as_str().and_then(|s| Uuid::parse_str(s).ok()).map(Into::into),
        AttributeKind::Json => Some(coerced.into()),
    };
    converted.ok_or_else(|| mismatch(attr, value))
}

fn column(attr: &AttributeDescriptor) -> Alias {
    Alias::new(attr.column.as_str())
}

fn condition(schema: &ModelSchema, params: &Params) -> Result<Condition, ServiceError> {
    let mut cond = Condition::all();
    for (attr, value) in condition_attributes(schema, params) {
        let col = Expr::col(column(attr));
        let expr: SimpleExpr = match value {
            Value::Null => col.is_null(),
            Value::Array(options) => {
                let values = options.iter().map(|o| to_sea_value(attr, o)).collect::<Result<Vec<_>, _>>()?;
                col.is_in(values)
            }
            other => col.eq(to_sea_value(attr, other)?),
        };
        cond = cond.add(expr);
    }
    Ok(cond)
}

/// One multi-row `INSERT`. Columns are every declared attribute present in
/// any record; records lacking one bind a typed `NULL`.
pub fn insert_statement(schema: &ModelSchema, records: &[Params]) -> Result<InsertStatement, ServiceError> {
    let attrs: Vec<&AttributeDescriptor> =
        schema.attributes().iter().filter(|a| records.iter().any(|r| r.contains_key(&a.name))).collect();
    if attrs.is_empty() {
        return Err(ServiceError::body_mismatch(format!("no declared {} attributes to insert", schema.name())));
    }
    let mut stmt = Query::insert();
    stmt.into_table(Alias::new(schema.table())).columns(attrs.iter().map(|a| column(a)));
    for record in records {
        let row = attrs
            .iter()
            .map(|a| match record.get(&a.name) {
                Some(v) => to_sea_value(a, v).map(SimpleExpr::Value),
                None => Ok(SimpleExpr::Value(typed_null(a.kind))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        stmt.values(row).map_err(|e| ServiceError::body_mismatch(e.to_string()))?;
    }
    Ok(stmt)
}

/// `None` when no declared attribute is left to set.
pub fn update_statement(schema: &ModelSchema, params: &UpdateParams) -> Result<Option<UpdateStatement>, ServiceError> {
    let mut stmt = Query::update();
    stmt.table(Alias::new(schema.table()));
    let mut any = false;
    for (name, value) in &params.updates {
        match schema.attribute(name) {
            Some(attr) => {
                stmt.value(column(attr), to_sea_value(attr, value)?);
                any = true;
            }
            None => debug!(model = %schema.name(), key = %name, "ignoring undeclared update value"),
        }
    }
    if !any {
        return Ok(None);
    }
    stmt.cond_where(condition(schema, &params.conditions)?);
    Ok(Some(stmt))
}

/// Refuses an unconditional delete.
pub fn delete_statement(schema: &ModelSchema, params: &Params) -> Result<DeleteStatement, ServiceError> {
    if condition_attributes(schema, params).is_empty() {
        return Err(ServiceError::body_mismatch(format!("delete on {} without conditions", schema.name())));
    }
    Ok(Query::delete().from_table(Alias::new(schema.table())).cond_where(condition(schema, params)?).to_owned())
}

/// Every attribute aliased to its name, ordered by primary key. Paging keys
/// are not read here.
pub fn select_statement(schema: &ModelSchema, params: &Params) -> Result<SelectStatement, ServiceError> {
    let mut stmt = Query::select();
    for attr in schema.attributes() {
        stmt.expr_as(Expr::col(column(attr)), Alias::new(attr.name.as_str()));
    }
    stmt.from(Alias::new(schema.table())).cond_where(condition(schema, params)?);
    if let Some(pk) = schema.primary_key() {
        stmt.order_by(column(pk), Order::Asc);
    }
    Ok(stmt)
}

/// `select_statement` with the offset/limit the list filter left under the
/// paging keys.
pub fn list_statement(schema: &ModelSchema, params: &Params) -> Result<SelectStatement, ServiceError> {
    let mut stmt = select_statement(schema, params)?;
    let (offset, limit) = offset_limit(params);
    if let Some(limit) = limit {
        stmt.limit(limit);
    }
    if let Some(offset) = offset {
        stmt.offset(offset);
    }
    Ok(stmt)
}

pub fn count_statement(schema: &ModelSchema, params: &Params) -> Result<SelectStatement, ServiceError> {
    Ok(Query::select()
        .expr_as(Expr::col(Asterisk).count(), Alias::new(TOTAL_ALIAS))
        .from(Alias::new(schema.table()))
        .cond_where(condition(schema, params)?)
        .to_owned())
}

fn row_to_params(schema: &ModelSchema, row: JsonValue) -> Params {
    let mut map = match row {
        Value::Object(map) => map,
        _ => return Params::new(),
    };
    schema
        .attributes()
        .iter()
        .filter_map(|a| {
            let v = a.kind.coerce(map.remove(&a.name)?);
            (!v.is_null()).then(|| (a.name.clone(), v))
        })
        .collect()
}

impl<C> SeaOrmMapper<C>
where
    C: ConnectionTrait + Send + Sync,
{
    async fn fetch(&self, schema: &ModelSchema, stmt: &SelectStatement) -> Result<Vec<Params>, ServiceError> {
        let backend = self.conn.get_database_backend();
        let rows = JsonValue::find_by_statement(backend.build(stmt)).all(&self.conn).await?;
        Ok(rows.into_iter().map(|r| row_to_params(schema, r)).collect())
    }
}

#[async_trait]
impl<C> Mapper for SeaOrmMapper<C>
where
    C: ConnectionTrait + TransactionTrait + Send + Sync,
{
    async fn save(&self, schema: &ModelSchema, record: Params) -> Result<u64, ServiceError> {
        self.batch_save(schema, vec![record]).await
    }

    async fn batch_save(&self, schema: &ModelSchema, records: Vec<Params>) -> Result<u64, ServiceError> {
        if records.is_empty() {
            return Ok(0);
        }
        let stmt = insert_statement(schema, &records)?;
        let backend = self.conn.get_database_backend();
        Ok(self.conn.execute(backend.build(&stmt)).await?.rows_affected())
    }

    /// All chunks in one transaction; over a `DatabaseTransaction` this nests
    /// as a savepoint.
    async fn batch_save_chunks(&self, schema: &ModelSchema, chunks: Vec<Vec<Params>>) -> Result<u64, ServiceError> {
        let stmts = chunks
            .iter()
            .filter(|c| !c.is_empty())
            .map(|c| insert_statement(schema, c))
            .collect::<Result<Vec<_>, _>>()?;
        if stmts.is_empty() {
            return Ok(0);
        }
        let backend = self.conn.get_database_backend();
        let txn = self.conn.begin().await?;
        let mut saved = 0;
        for stmt in &stmts {
            match txn.execute(backend.build(stmt)).await {
                Ok(res) => saved += res.rows_affected(),
                Err(e) => {
                    txn.rollback().await?;
                    return Err(e.into());
                }
            }
        }
        txn.commit().await?;
        debug!(model = %schema.name(), chunks = stmts.len(), saved, "chunked batch committed");
        Ok(saved)
    }

    async fn update(&self, schema: &ModelSchema, params: UpdateParams) -> Result<u64, ServiceError> {
        let Some(stmt) = update_statement(schema, &params)? else {
            debug!(model = %schema.name(), "update has nothing to set");
            return Ok(0);
        };
        let backend = self.conn.get_database_backend();
        Ok(self.conn.execute(backend.build(&stmt)).await?.rows_affected())
    }

    async fn delete(&self, schema: &ModelSchema, params: Params) -> Result<u64, ServiceError> {
        let stmt = delete_statement(schema, &params)?;
        let backend = self.conn.get_database_backend();
        Ok(self.conn.execute(backend.build(&stmt)).await?.rows_affected())
    }

    async fn select(&self, schema: &ModelSchema, params: Params) -> Result<Option<Params>, ServiceError> {
        let mut stmt = select_statement(schema, &params)?;
        // a second row is enough to detect ambiguity
        stmt.limit(2);
        let mut rows = self.fetch(schema, &stmt).await?;
        if rows.len() > 1 {
            return Err(ServiceError::Db(format!("select on {} matched more than one row", schema.name())));
        }
        Ok(rows.pop())
    }

    async fn get_list(&self, schema: &ModelSchema, params: Params) -> Result<Vec<Params>, ServiceError> {
        let stmt = list_statement(schema, &params)?;
        self.fetch(schema, &stmt).await
    }

    async fn get_total(&self, schema: &ModelSchema, params: Params) -> Result<u64, ServiceError> {
        let stmt = count_statement(schema, &params)?;
        let backend = self.conn.get_database_backend();
        let total = match self.conn.query_one(backend.build(&stmt)).await? {
            Some(row) => row.try_get::<i64>("", TOTAL_ALIAS)?,
            None => 0,
        };
        Ok(total.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::article_schema;
    use sea_orm::sea_query::{PostgresQueryBuilder, QueryStatementWriter};
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn params(v: Value) -> Params { v.as_object().cloned().unwrap() }

    #[test]
    fn insert_covers_union_of_columns() {
        let schema = article_schema();
        let rows = vec![params(json!({"id": "a", "title": "x"})), params(json!({"id": "b", "viewCount": "3"}))];
        let sql = insert_statement(&schema, &rows).unwrap().to_string(PostgresQueryBuilder);
        assert!(sql.starts_with(r#"INSERT INTO "article" ("id", "title", "view_count")"#), "{sql}");
        assert!(sql.contains("('a', 'x', NULL)"), "{sql}");
        assert!(sql.contains("('b', NULL, 3)"), "{sql}");
    }

    #[test]
    fn insert_rejects_values_of_the_wrong_kind() {
        let schema = article_schema();
        let err = insert_statement(&schema, &[params(json!({"id": "a", "viewCount": "many"}))]).unwrap_err();
        assert!(matches!(err, ServiceError::BodyMismatch(_)));
    }

    #[test]
    fn update_sets_new_values_under_conditions() {
        let schema = article_schema();
        let up = UpdateParams::new(params(json!({"id": "a"})), params(json!({"title": "y", "unknown": 1})));
        let sql = update_statement(&schema, &up).unwrap().unwrap().to_string(PostgresQueryBuilder);
        assert_eq!(sql, r#"UPDATE "article" SET "title" = 'y' WHERE "id" = 'a'"#);

        let nothing = UpdateParams::new(params(json!({"id": "a"})), params(json!({"unknown": 1})));
        assert!(update_statement(&schema, &nothing).unwrap().is_none());
    }

    #[test]
    fn conditions_support_null_and_membership() {
        let schema = article_schema();
        let sql = delete_statement(&schema, &params(json!({"title": null, "viewCount": [1, "2"]})))
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(sql.starts_with(r#"DELETE FROM "article" WHERE"#), "{sql}");
        assert!(sql.contains(r#""title" IS NULL"#), "{sql}");
        assert!(sql.contains(r#""view_count" IN (1, 2)"#), "{sql}");
    }

    #[test]
    fn delete_without_declared_conditions_is_refused() {
        let schema = article_schema();
        for p in [json!({"pageIndex": 1}), json!({"titel": "typo"})] {
            assert!(matches!(delete_statement(&schema, &params(p)), Err(ServiceError::BodyMismatch(_))));
        }
    }

    #[test]
    fn select_ignores_paging_keys() {
        let schema = article_schema();
        let sql = select_statement(&schema, &params(json!({"id": "a1", "pageIndex": 3})))
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(sql.ends_with(r#"WHERE "id" = 'a1' ORDER BY "id" ASC"#), "{sql}");
        assert!(!sql.contains("OFFSET"), "{sql}");
    }

    #[test]
    fn list_aliases_orders_and_pages() {
        let schema = article_schema();
        let sql = list_statement(&schema, &params(json!({"title": "x", "pageIndex": 4, "pageSize": 2})))
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#""view_count" AS "viewCount""#), "{sql}");
        assert!(sql.contains(r#"FROM "article" WHERE "title" = 'x'"#), "{sql}");
        assert!(sql.contains(r#"ORDER BY "id" ASC"#), "{sql}");
        assert!(sql.contains("LIMIT 2"), "{sql}");
        assert!(sql.contains("OFFSET 4"), "{sql}");
    }

    #[test]
    fn count_ignores_paging_keys() {
        let schema = article_schema();
        let sql = count_statement(&schema, &params(json!({"title": "x", "pageIndex": 0, "pageSize": 10})))
            .unwrap()
            .to_string(PostgresQueryBuilder);
        assert_eq!(sql, r#"SELECT COUNT(*) AS "total" FROM "article" WHERE "title" = 'x'"#);
    }

    #[tokio::test]
    async fn batch_save_reports_rows_affected() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult { last_insert_id: 0, rows_affected: 2 }])
            .into_connection();
        let mapper = SeaOrmMapper::new(conn);
        let n = mapper
            .batch_save(&article_schema(), vec![params(json!({"id": "a"})), params(json!({"id": "b"}))])
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn chunks_commit_in_one_transaction() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult { last_insert_id: 0, rows_affected: 2 },
                MockExecResult { last_insert_id: 0, rows_affected: 1 },
            ])
            .into_connection();
        let mapper = SeaOrmMapper::new(conn);
        let chunks = vec![
            vec![params(json!({"id": "a"})), params(json!({"id": "b"}))],
            vec![params(json!({"id": "c"}))],
        ];
        assert_eq!(mapper.batch_save_chunks(&article_schema(), chunks).await.unwrap(), 3);
        assert_eq!(mapper.into_inner().into_transaction_log().len(), 1);
    }

    #[tokio::test]
    async fn failing_chunk_fails_the_whole_batch() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult { last_insert_id: 0, rows_affected: 25 }])
            .append_exec_errors([sea_orm::DbErr::Custom("duplicate key".into())])
            .into_connection();
        let mapper = SeaOrmMapper::new(conn);
        let chunks = vec![vec![params(json!({"id": "a"}))], vec![params(json!({"id": "dup"}))]];
        let err = mapper.batch_save_chunks(&article_schema(), chunks).await.unwrap_err();
        assert!(matches!(err, ServiceError::Db(_)));
    }

    #[tokio::test]
    async fn empty_update_does_not_reach_the_database() {
        let mapper = SeaOrmMapper::new(MockDatabase::new(DatabaseBackend::Postgres).into_connection());
        let n = mapper
            .update(&article_schema(), UpdateParams::new(params(json!({"id": "a"})), Params::new()))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn total_reads_count_alias() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![BTreeMap::from([(TOTAL_ALIAS, SeaValue::from(7i64))])]])
            .into_connection();
        let mapper = SeaOrmMapper::new(conn);
        assert_eq!(mapper.get_total(&article_schema(), Params::new()).await.unwrap(), 7);
    }
}
