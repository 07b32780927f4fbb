#![cfg(test)]
use std::sync::Arc;

use models::{AttributeDescriptor, ModelSchema};
use serde::{Deserialize, Serialize};

use crate::data_service::DataService;
use crate::mapper::MemoryMapper;

pub fn article_schema() -> ModelSchema {
    ModelSchema::builder("article")
        .title("Articles")
        .attribute(AttributeDescriptor::string("id").hidden())
        .attribute(AttributeDescriptor::string("title").title("Title"))
        .attribute(AttributeDescriptor::integer("viewCount").title("Views"))
        .timestamps()
        .primary_key("id")
        .build()
        .expect("article schema")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Article {
    pub fn titled(title: &str) -> Self {
        Self { title: Some(title.to_string()), ..Self::default() }
    }
}

/// Article service over a fresh in-memory mapper.
pub fn article_service() -> (DataService<Article, MemoryMapper>, Arc<MemoryMapper>) {
    let mapper = Arc::new(MemoryMapper::new());
    (DataService::new(Arc::new(article_schema()), Arc::clone(&mapper)), mapper)
}
