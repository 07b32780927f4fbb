//! Operation parameters shared by services and mappers.

use chrono::{SecondsFormat, Utc};
use serde::{de::DeserializeOwned, ser::Error as _, Deserialize, Serialize};
use serde_json::Value;

/// Attribute name -> value.
pub type Params = serde_json::Map<String, Value>;

/// Paging keys read by list operations and rewritten to offset/limit.
pub const PAGE_INDEX: &str = "pageIndex";
pub const PAGE_SIZE: &str = "pageSize";

/// Match conditions and new values of one update, kept apart so the same
/// attribute can appear on both sides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateParams {
    #[serde(default)]
    pub conditions: Params,
    #[serde(default)]
    pub updates: Params,
}

impl UpdateParams {
    pub fn new(conditions: Params, updates: Params) -> Self {
        Self { conditions, updates }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.updates.is_empty()
    }
}

/// Missing, `null` or an empty string.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// Serialize a record into parameters, dropping `null` attributes.
pub fn to_params<T: Serialize>(record: &T) -> Result<Params, serde_json::Error> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map.into_iter().filter(|(_, v)| !v.is_null()).collect()),
        other => Err(serde_json::Error::custom(format!("record must serialize to an object, got {other}"))),
    }
}

/// Build a record from parameters.
pub fn from_params<T: DeserializeOwned>(params: Params) -> Result<T, serde_json::Error> {
    serde_json::from_value(Value::Object(params))
}

/// Current time in the wire format used for timestamp attributes.
pub fn now_timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}
