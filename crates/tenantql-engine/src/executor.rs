//! Execution collaborator seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Statement rejected: {0}")]
    Rejected(String),

    #[error("Query execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("No database for tenant '{0}'")]
    UnknownTenant(String),

    #[error("Execution backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExecutionError {
    pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        ExecutionError::Backend(Box::new(e))
    }
}

/// Rows come back as JSON values so callers need no knowledge of the database types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
}

/// Read-only, row- and time-bounded execution of translated SQL
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, tenant_id: &str, sql: &str) -> Result<QueryResult, ExecutionError>;
}

/// A few rows of one tenant table, shown to the generation backend so it
/// sees real values next to column names
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn sample(&self, tenant_id: &str, table: &str, rows: usize) -> Result<QueryResult, ExecutionError>;
}
