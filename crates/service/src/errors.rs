use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Misdeclared schema or a record that cannot be built; not retryable.
    #[error("server configuration error: {0}")]
    ServerConfiguration(String),
    /// Parameters rejected by a filter or a validation hook.
    #[error("parameters do not match: {0}")]
    BodyMismatch(String),
    #[error("database error: {0}")]
    Db(String),
    #[error("import failed: {0}")]
    ImportFailed(String),
    #[error("export failed: {0}")]
    ExportFailed(String),
    #[error("model error: {0}")]
    Model(#[from] models::errors::ModelError),
}

impl ServiceError {
    pub fn body_mismatch(reason: impl Into<String>) -> Self { Self::BodyMismatch(reason.into()) }

    pub fn missing_primary_key(model: &str) -> Self {
        Self::ServerConfiguration(format!("model {model} declares no primary key"))
    }

    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            ServiceError::BodyMismatch(_) => 1001,
            ServiceError::ServerConfiguration(_) => 1100,
            ServiceError::Model(_) => 1101,
            ServiceError::Db(_) => 1200,
            ServiceError::ImportFailed(_) => 1301,
            ServiceError::ExportFailed(_) => 1302,
        }
    }
}

impl From<sea_orm::DbErr> for ServiceError {
    fn from(e: sea_orm::DbErr) -> Self { Self::Db(e.to_string()) }
}
