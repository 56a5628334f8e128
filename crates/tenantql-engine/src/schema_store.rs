//! Schema Store: where tenant schemas come from
//!
//! The layout on disk is one directory per tenant holding `schema.yaml`:
//!
//! ```yaml
//! tables:
//!   awards:
//!     description: Federal contract awards
//!     columns:
//!       generated_unique_award_id: { type: VARCHAR, nullable: false, is_primary_key: true }
//!       recipient_id: { type: INTEGER, references: recipients.id }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tenantql_model::{CanonicalError, CanonicalSchema, Column, Relationship, Table, TenantSchema};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("No schema registered for tenant '{0}'")]
    NotFound(String),

    #[error("Invalid tenant id: {0:?}")]
    InvalidTenant(String),

    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse schema YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid canonical vocabulary: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("Schema backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Load a tenant's schema, failing with [`SchemaError::NotFound`] if none is registered
    async fn load(&self, tenant_id: &str) -> Result<TenantSchema, SchemaError>;
}

/// Tenant ids end up in file paths, so only `[A-Za-z0-9_-]` is accepted
pub fn validate_tenant_id(tenant_id: &str) -> Result<(), SchemaError> {
    let ok = !tenant_id.is_empty()
        && tenant_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(SchemaError::InvalidTenant(tenant_id.to_string()))
    }
}

/// In-memory schema store for tests and embedding
#[derive(Debug, Default)]
pub struct MemorySchemaStore {
    schemas: HashMap<String, TenantSchema>,
}

impl MemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, schema: TenantSchema) -> Self {
        self.insert(schema);
        self
    }

    pub fn insert(&mut self, schema: TenantSchema) {
        self.schemas.insert(schema.tenant_id.clone(), schema);
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    async fn load(&self, tenant_id: &str) -> Result<TenantSchema, SchemaError> {
        self.schemas
            .get(tenant_id)
            .cloned()
            .ok_or_else(|| SchemaError::NotFound(tenant_id.to_string()))
    }
}

/// Reads `<root>/<tenant>/schema.yaml`
#[derive(Debug, Clone)]
pub struct YamlSchemaStore {
    root: PathBuf,
}

impl YamlSchemaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, tenant_id: &str) -> PathBuf {
        self.root.join(tenant_id).join("schema.yaml")
    }
}

#[async_trait]
impl SchemaStore for YamlSchemaStore {
    async fn load(&self, tenant_id: &str) -> Result<TenantSchema, SchemaError> {
        validate_tenant_id(tenant_id)?;
        let path = self.path_for(tenant_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SchemaError::NotFound(tenant_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let schema = parse_schema_yaml(tenant_id, &contents)?;
        tracing::debug!(
            tenant = tenant_id,
            path = %path.display(),
            tables = schema.tables.len(),
            "Loaded tenant schema"
        );
        Ok(schema)
    }
}

#[derive(Deserialize)]
struct SchemaDocument {
    #[serde(default)]
    tables: serde_yaml::Mapping,

    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
struct TableDocument {
    #[serde(default)]
    description: Option<String>,

    #[serde(default)]
    columns: serde_yaml::Mapping,
}

#[derive(Deserialize)]
struct ColumnDocument {
    #[serde(rename = "type", default = "unknown_type")]
    data_type: String,

    #[serde(default = "nullable_default")]
    nullable: bool,

    #[serde(default)]
    description: Option<String>,

    #[serde(default, alias = "primary_key")]
    is_primary_key: bool,

    /// `table.column` this column points at
    #[serde(default)]
    references: Option<String>,
}

fn unknown_type() -> String {
    "VARCHAR".to_string()
}

fn nullable_default() -> bool {
    true
}

fn key_name(key: &serde_yaml::Value) -> Result<String, SchemaError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        other => Err(SchemaError::Backend(format!("non-string name in schema: {:?}", other))),
    }
}

/// Parse the YAML schema layout, keeping table and column order from the file
pub fn parse_schema_yaml(tenant_id: &str, contents: &str) -> Result<TenantSchema, SchemaError> {
    let document: SchemaDocument = serde_yaml::from_str(contents)?;
    let mut schema = TenantSchema::new(tenant_id);
    schema.relationships = document.relationships;

    for (table_key, table_value) in document.tables {
        let table_name = key_name(&table_key)?;
        let table_doc: TableDocument = serde_yaml::from_value(table_value)?;

        let mut columns = Vec::with_capacity(table_doc.columns.len());
        for (column_key, column_value) in table_doc.columns {
            let column_name = key_name(&column_key)?;
            let doc: ColumnDocument = serde_yaml::from_value(column_value)?;

            if let Some((target_table, target_column)) =
                doc.references.as_deref().and_then(|r| r.split_once('.'))
            {
                schema.relationships.push(Relationship {
                    table: table_name.clone(),
                    column: column_name.clone(),
                    target_table: target_table.to_string(),
                    target_column: target_column.to_string(),
                });
            }

            columns.push(Column {
                name: column_name,
                data_type: doc.data_type,
                nullable: doc.nullable && !doc.is_primary_key,
                description: doc.description,
                primary_key: doc.is_primary_key,
            });
        }

        schema.tables.push(Table {
            name: table_name,
            description: table_doc.description,
            columns,
        });
    }
    Ok(schema)
}

/// Parse a replacement canonical vocabulary (`version` plus `tables` with
/// their `fields`), rejecting field names declared by two tables
pub fn parse_canonical_yaml(contents: &str) -> Result<CanonicalSchema, SchemaError> {
    let schema: CanonicalSchema = serde_yaml::from_str(contents)?;
    schema.validate()?;
    Ok(schema)
}

pub async fn load_canonical_file(path: &Path) -> Result<CanonicalSchema, SchemaError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let schema = parse_canonical_yaml(&contents)?;
    tracing::info!(
        path = %path.display(),
        version = %schema.version,
        tables = schema.tables.len(),
        "Loaded canonical vocabulary"
    );
    Ok(schema)
}
