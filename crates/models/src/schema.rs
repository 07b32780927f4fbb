//! Static schema descriptors.
//!
//! A `ModelSchema` tells the service layer everything it would otherwise
//! have to discover at runtime: which attributes a record has, which one is
//! the primary key, which ones carry the creation/update timestamps and
//! which ones go into spreadsheet exports.

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

/// Attribute name picked up as the creation timestamp when none is declared.
pub const CREATED_AT: &str = "createdAt";
/// Attribute name picked up as the update timestamp when none is declared.
pub const UPDATED_AT: &str = "updatedAt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    String,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Uuid,
    Json,
}

impl AttributeKind {
    /// Kinds whose values travel as JSON strings and can receive a generated id.
    pub fn is_textual(self) -> bool {
        matches!(self, AttributeKind::String | AttributeKind::Uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Key used in records and operation parameters.
    pub name: String,
    /// Storage column.
    pub column: String,
    pub kind: AttributeKind,
    /// Spreadsheet header; falls back to `name`.
    pub title: Option<String>,
    pub exportable: bool,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        let name = name.into();
        Self { column: to_snake_case(&name), name, kind, title: None, exportable: true }
    }

    pub fn string(name: impl Into<String>) -> Self { Self::new(name, AttributeKind::String) }
    pub fn integer(name: impl Into<String>) -> Self { Self::new(name, AttributeKind::Integer) }
    pub fn float(name: impl Into<String>) -> Self { Self::new(name, AttributeKind::Float) }
    pub fn boolean(name: impl Into<String>) -> Self { Self::new(name, AttributeKind::Boolean) }
    pub fn timestamp(name: impl Into<String>) -> Self { Self::new(name, AttributeKind::Timestamp) }
    pub fn uuid(name: impl Into<String>) -> Self { Self::new(name, AttributeKind::Uuid) }
    pub fn json(name: impl Into<String>) -> Self { Self::new(name, AttributeKind::Json) }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Keep the attribute out of spreadsheet exports.
    pub fn hidden(mut self) -> Self {
        self.exportable = false;
        self
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => &self.name,
        }
    }
}

/// Immutable description of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSchema {
    name: String,
    table: String,
    title: String,
    attributes: Vec<AttributeDescriptor>,
    primary_key: Option<usize>,
    created_at: Option<usize>,
    updated_at: Option<usize>,
}

impl ModelSchema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn table(&self) -> &str { &self.table }
    pub fn title(&self) -> &str { &self.title }
    pub fn attributes(&self) -> &[AttributeDescriptor] { &self.attributes }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn primary_key(&self) -> Option<&AttributeDescriptor> {
        self.primary_key.map(|i| &self.attributes[i])
    }

    pub fn created_at(&self) -> Option<&AttributeDescriptor> {
        self.created_at.map(|i| &self.attributes[i])
    }

    pub fn updated_at(&self) -> Option<&AttributeDescriptor> {
        self.updated_at.map(|i| &self.attributes[i])
    }

    /// Attributes written to spreadsheet exports, in declaration order.
    pub fn exportable_attributes(&self) -> impl Iterator<Item = &AttributeDescriptor> {
        self.attributes.iter().filter(|a| a.exportable)
    }

    /// Find the attribute a spreadsheet header refers to, by title first, then by name.
    pub fn attribute_for_header(&self, header: &str) -> Option<&AttributeDescriptor> {
        let header = header.trim();
        self.attributes
            .iter()
            .find(|a| a.title.as_deref().map(str::trim) == Some(header))
            .or_else(|| self.attribute(header))
    }
}

pub struct SchemaBuilder {
    name: String,
    table: Option<String>,
    title: Option<String>,
    attributes: Vec<AttributeDescriptor>,
    primary_key: Option<String>,
    created_at: Option<String>,
    updated_at: Option<String>,
}

impl SchemaBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            title: None,
            attributes: Vec::new(),
            primary_key: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = Some(name.into());
        self
    }

    pub fn created_at(mut self, name: impl Into<String>) -> Self {
        self.created_at = Some(name.into());
        self
    }

    pub fn updated_at(mut self, name: impl Into<String>) -> Self {
        self.updated_at = Some(name.into());
        self
    }

    /// Declare `createdAt`/`updatedAt` timestamp attributes.
    pub fn timestamps(self) -> Self {
        self.attribute(AttributeDescriptor::timestamp(CREATED_AT).hidden())
            .attribute(AttributeDescriptor::timestamp(UPDATED_AT).hidden())
    }

    pub fn build(self) -> Result<ModelSchema, ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::Validation("model name required".into()));
        }
        for (i, a) in self.attributes.iter().enumerate() {
            if a.name.trim().is_empty() || a.column.trim().is_empty() {
                return Err(ModelError::Validation(format!("{}: attribute #{i} has an empty name or column", self.name)));
            }
            if self.attributes[..i].iter().any(|b| b.name == a.name) {
                return Err(ModelError::Validation(format!("{}: duplicate attribute {}", self.name, a.name)));
            }
        }

        let position = |attr: &str| self.attributes.iter().position(|a| a.name == attr);
        let declared = |attr: Option<&String>, role: &str| -> Result<Option<usize>, ModelError> {
            match attr {
                None => Ok(None),
                Some(attr) => position(attr)
                    .map(Some)
                    .ok_or_else(|| ModelError::Validation(format!("{}: {role} attribute {attr} is not declared", self.name))),
            }
        };

        let primary_key = declared(self.primary_key.as_ref(), "primary key")?;
        let created_at = match declared(self.created_at.as_ref(), "creation timestamp")? {
            Some(i) => Some(i),
            None => position(CREATED_AT),
        };
        let updated_at = match declared(self.updated_at.as_ref(), "update timestamp")? {
            Some(i) => Some(i),
            None => position(UPDATED_AT),
        };
        for i in created_at.iter().chain(updated_at.iter()) {
            let a = &self.attributes[*i];
            if a.kind != AttributeKind::Timestamp {
                return Err(ModelError::Validation(format!("{}: {} must be a timestamp attribute", self.name, a.name)));
            }
        }

        Ok(ModelSchema {
            table: self.table.unwrap_or_else(|| to_snake_case(&self.name)),
            title: self.title.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            attributes: self.attributes,
            primary_key,
            created_at,
            updated_at,
        })
    }
}

/// `createdAt` -> `created_at`
pub fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
