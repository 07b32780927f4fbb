//! Application-owned schema registry.
//!
//! Built once at startup (in code or from a TOML file) and passed by
//! reference to every service that needs a schema.

use std::{collections::BTreeMap, sync::Arc};

use serde::Deserialize;
use tracing::info;

use crate::errors::ModelError;
use crate::schema::{AttributeDescriptor, AttributeKind, ModelSchema};

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<ModelSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self { Self::default() }

    /// Add a schema; model names must be unique.
    pub fn register(&mut self, schema: ModelSchema) -> Result<Arc<ModelSchema>, ModelError> {
        if self.schemas.contains_key(schema.name()) {
            return Err(ModelError::Validation(format!("model {} registered twice", schema.name())));
        }
        let schema = Arc::new(schema);
        self.schemas.insert(schema.name().to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ModelSchema>> {
        self.schemas.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<ModelSchema>, ModelError> {
        self.get(name).ok_or_else(|| ModelError::Validation(format!("unknown model {name}")))
    }

    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ModelSchema>> {
        self.schemas.values()
    }

    pub fn len(&self) -> usize { self.schemas.len() }
    pub fn is_empty(&self) -> bool { self.schemas.is_empty() }

    /// Parse `[[model]]` tables, see `SchemaFile`.
    pub fn from_toml_str(content: &str) -> Result<Self, ModelError> {
        let file: SchemaFile = toml::from_str(content).map_err(|e| ModelError::Validation(e.to_string()))?;
        let mut registry = Self::new();
        for def in file.models {
            registry.register(def.into_schema()?)?;
        }
        info!(models = registry.len(), "schema_registry_loaded");
        Ok(registry)
    }

    pub fn from_file(path: &str) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path).map_err(|e| ModelError::Validation(format!("{path}: {e}")))?;
        Self::from_toml_str(&content)
    }
}

/// On-disk form:
///
/// ```toml
/// [[model]]
/// name = "article"
/// primary_key = "id"
/// timestamps = true
/// attributes = [
///   { name = "id", kind = "string" },
///   { name = "title", kind = "string", title = "Title" },
/// ]
/// ```
#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(rename = "model", default)]
    models: Vec<SchemaDef>,
}

#[derive(Debug, Deserialize)]
struct SchemaDef {
    name: String,
    table: Option<String>,
    title: Option<String>,
    primary_key: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
    #[serde(default)]
    timestamps: bool,
    #[serde(default)]
    attributes: Vec<AttributeDef>,
}

#[derive(Debug, Deserialize)]
struct AttributeDef {
    name: String,
    kind: AttributeKind,
    column: Option<String>,
    title: Option<String>,
    #[serde(default = "default_exportable")]
    exportable: bool,
}

fn default_exportable() -> bool { true }

impl SchemaDef {
    fn into_schema(self) -> Result<ModelSchema, ModelError> {
        let mut b = ModelSchema::builder(self.name);
        if let Some(t) = self.table { b = b.table(t); }
        if let Some(t) = self.title { b = b.title(t); }
        for a in self.attributes {
            let mut d = AttributeDescriptor::new(a.name, a.kind);
            if let Some(c) = a.column { d = d.column(c); }
            if let Some(t) = a.title { d = d.title(t); }
            if !a.exportable { d = d.hidden(); }
            b = b.attribute(d);
        }
        if self.timestamps { b = b.timestamps(); }
        if let Some(pk) = self.primary_key { b = b.primary_key(pk); }
        if let Some(c) = self.created_at { b = b.created_at(c); }
        if let Some(u) = self.updated_at { b = b.updated_at(u); }
        b.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMAS: &str = r#"
[[model]]
name = "article"
title = "Articles"
primary_key = "id"
timestamps = true
attributes = [
  { name = "id", kind = "string", exportable = false },
  { name = "title", kind = "string", title = "Title" },
  { name = "viewCount", kind = "integer", column = "views" },
]

[[model]]
name = "tag"
primary_key = "id"
attributes = [{ name = "id", kind = "integer" }, { name = "label", kind = "string" }]
"#;

    #[test]
    fn loads_models_from_toml() {
        let reg = SchemaRegistry::from_toml_str(SCHEMAS).unwrap();
        assert_eq!(reg.names(), vec!["article".to_string(), "tag".to_string()]);
        let article = reg.require("article").unwrap();
        assert_eq!(article.attribute("viewCount").unwrap().column, "views");
        assert!(article.created_at().is_some());
        assert_eq!(article.exportable_attributes().count(), 2);
        assert!(reg.get("tag").unwrap().updated_at().is_none());
    }

    #[test]
    fn duplicate_model_names_are_rejected() {
        let mut reg = SchemaRegistry::new();
        let s = || ModelSchema::builder("tag").attribute(AttributeDescriptor::string("id")).build().unwrap();
        reg.register(s()).unwrap();
        assert!(matches!(reg.register(s()), Err(ModelError::Validation(_))));
    }

    #[test]
    fn unknown_model_is_an_error() {
        assert!(SchemaRegistry::new().require("nope").is_err());
    }
}
