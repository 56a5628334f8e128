use thiserror::Error;

use crate::cache::StoreError;
use crate::classifier::ClassifyError;
use crate::discovery::DiscoveryError;
use crate::schema_store::SchemaError;

/// Fatal failures of a translate call. Everything recoverable is reported
/// inside the `TranslationResult` instead.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("No schema registered for tenant '{0}'")]
    SchemaNotFound(String),

    #[error(transparent)]
    Schema(SchemaError),

    #[error("Mapping discovery unavailable for tenant '{tenant}': {source}")]
    MappingDiscoveryFailed {
        tenant: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("Mapping cache error: {0}")]
    Cache(#[from] StoreError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl From<SchemaError> for TranslateError {
    fn from(e: SchemaError) -> Self {
        match e {
            SchemaError::NotFound(tenant) => TranslateError::SchemaNotFound(tenant),
            other => TranslateError::Schema(other),
        }
    }
}

impl From<ClassifyError> for TranslateError {
    fn from(e: ClassifyError) -> Self {
        TranslateError::InvalidQuery(e.to_string())
    }
}

impl From<tenantql_sql::SqlError> for TranslateError {
    fn from(e: tenantql_sql::SqlError) -> Self {
        TranslateError::InvalidQuery(e.to_string())
    }
}
