use serde::{Deserialize, Serialize};

/// Liveness payload; lists the model names the process serves.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Health {
    pub status: String,
    pub models: Vec<String>,
}

impl Health {
    pub fn ok(models: Vec<String>) -> Self {
        Self { status: "ok".into(), models }
    }
}

/// Envelope for list endpoints: one page of rows plus the unpaged total.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
}
