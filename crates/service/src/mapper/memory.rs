//! In-process mapper for tests and doc examples.
//!
//! Keeps rows per model in insertion order and records every call it
//! receives so tests can assert on exactly what the filter pipeline
//! dispatched.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use models::{ModelSchema, Params, UpdateParams};
use serde_json::Value;

use super::{condition_attributes, Mapper};
use crate::errors::ServiceError;
use crate::pagination::offset_limit;

/// One call as received by the mapper.
#[derive(Debug, Clone, PartialEq)]
pub enum MapperCall {
    Save(Params),
    BatchSave(Vec<Params>),
    Update(UpdateParams),
    Delete(Params),
    Select(Params),
    List(Params),
    NestList(Params),
    Total(Params),
}

#[derive(Default)]
pub struct MemoryMapper {
    rows: Mutex<HashMap<String, Vec<Params>>>,
    calls: Mutex<Vec<MapperCall>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn matches(schema: &ModelSchema, row: &Params, conditions: &Params) -> bool {
    condition_attributes(schema, conditions).into_iter().all(|(attr, expected)| {
        let actual = row.get(&attr.name).cloned().map(|v| attr.kind.coerce(v)).unwrap_or(Value::Null);
        match expected {
            Value::Null => actual.is_null(),
            Value::Array(options) => options.iter().any(|o| attr.kind.coerce(o.clone()) == actual),
            other => attr.kind.coerce(other.clone()) == actual,
        }
    })
}

fn declared_only(schema: &ModelSchema, record: Params) -> Params {
    record.into_iter().filter(|(k, _)| schema.attribute(k).is_some()).collect()
}

impl MemoryMapper {
    pub fn new() -> Self { Self::default() }

    /// Seed rows for a model, bypassing the call log.
    pub fn with_rows(self, model: &str, rows: Vec<Params>) -> Self {
        guard(&self.rows).entry(model.to_string()).or_default().extend(rows);
        self
    }

    pub fn rows(&self, model: &str) -> Vec<Params> {
        guard(&self.rows).get(model).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<MapperCall> {
        guard(&self.calls).clone()
    }

    /// Sizes of every `batch_save` call, in order.
    pub fn batch_sizes(&self) -> Vec<usize> {
        guard(&self.calls)
            .iter()
            .filter_map(|c| match c {
                MapperCall::BatchSave(rows) => Some(rows.len()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MapperCall) {
        guard(&self.calls).push(call);
    }

    /// Checks every record before storing any, so a rejected batch leaves
    /// the table untouched.
    fn insert(&self, schema: &ModelSchema, records: Vec<Params>) -> Result<u64, ServiceError> {
        let mut all = guard(&self.rows);
        let table = all.entry(schema.name().to_string()).or_default();
        if let Some(pk) = schema.primary_key() {
            let mut seen: HashSet<String> = HashSet::new();
            for r in &records {
                if let Some(id) = r.get(&pk.name).filter(|v| !v.is_null()) {
                    let stored = table.iter().any(|row| row.get(&pk.name) == Some(id));
                    if stored || !seen.insert(id.to_string()) {
                        return Err(ServiceError::Db(format!("duplicate key {}={id}", pk.name)));
                    }
                }
            }
        }
        let n = records.len() as u64;
        table.extend(records.into_iter().map(|r| declared_only(schema, r)));
        Ok(n)
    }

    fn matching(&self, schema: &ModelSchema, params: &Params) -> Vec<Params> {
        guard(&self.rows)
            .get(schema.name())
            .map(|rows| rows.iter().filter(|r| matches(schema, r, params)).cloned().collect())
            .unwrap_or_default()
    }

    fn page(&self, schema: &ModelSchema, params: &Params) -> Vec<Params> {
        let (offset, limit) = offset_limit(params);
        self.matching(schema, params)
            .into_iter()
            .skip(offset.unwrap_or(0) as usize)
            .take(limit.map(|l| l as usize).unwrap_or(usize::MAX))
            .collect()
    }
}

#[async_trait]
impl Mapper for MemoryMapper {
    async fn save(&self, schema: &ModelSchema, record: Params) -> Result<u64, ServiceError> {
        self.record(MapperCall::Save(record.clone()));
        self.insert(schema, vec![record])
    }

    async fn batch_save(&self, schema: &ModelSchema, records: Vec<Params>) -> Result<u64, ServiceError> {
        self.record(MapperCall::BatchSave(records.clone()));
        self.insert(schema, records)
    }

    async fn batch_save_chunks(&self, schema: &ModelSchema, chunks: Vec<Vec<Params>>) -> Result<u64, ServiceError> {
        for chunk in &chunks {
            self.record(MapperCall::BatchSave(chunk.clone()));
        }
        self.insert(schema, chunks.into_iter().flatten().collect())
    }

    async fn update(&self, schema: &ModelSchema, params: UpdateParams) -> Result<u64, ServiceError> {
        self.record(MapperCall::Update(params.clone()));
        let updates = declared_only(schema, params.updates);
        let mut all = guard(&self.rows);
        let mut n = 0;
        for row in all.entry(schema.name().to_string()).or_default().iter_mut() {
            if matches(schema, row, &params.conditions) {
                for (k, v) in &updates {
                    row.insert(k.clone(), v.clone());
                }
                n += 1;
            }
        }
        Ok(n)
    }

    async fn delete(&self, schema: &ModelSchema, params: Params) -> Result<u64, ServiceError> {
        self.record(MapperCall::Delete(params.clone()));
        if condition_attributes(schema, &params).is_empty() {
            return Err(ServiceError::body_mismatch(format!("delete on {} without conditions", schema.name())));
        }
        let mut all = guard(&self.rows);
        let table = all.entry(schema.name().to_string()).or_default();
        let before = table.len();
        table.retain(|row| !matches(schema, row, &params));
        Ok((before - table.len()) as u64)
    }

    async fn select(&self, schema: &ModelSchema, params: Params) -> Result<Option<Params>, ServiceError> {
        self.record(MapperCall::Select(params.clone()));
        let mut found = self.matching(schema, &params);
        if found.len() > 1 {
            return Err(ServiceError::Db(format!("select matched {} rows", found.len())));
        }
        Ok(found.pop())
    }

    async fn get_list(&self, schema: &ModelSchema, params: Params) -> Result<Vec<Params>, ServiceError> {
        self.record(MapperCall::List(params.clone()));
        Ok(self.page(schema, &params))
    }

    async fn get_nest_list(&self, schema: &ModelSchema, params: Params) -> Result<Vec<Params>, ServiceError> {
        self.record(MapperCall::NestList(params.clone()));
        Ok(self.page(schema, &params))
    }

    async fn get_total(&self, schema: &ModelSchema, params: Params) -> Result<u64, ServiceError> {
        self.record(MapperCall::Total(params.clone()));
        Ok(self.matching(schema, &params).len() as u64)
    }
}
