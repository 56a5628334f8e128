//! Tenant schemas read from the DuckDB catalog

use async_trait::async_trait;
use duckdb::Connection;
use std::path::PathBuf;
use tenantql_engine::model::{Column, Relationship, Table, TenantSchema};
use tenantql_engine::{validate_tenant_id, SchemaError, SchemaStore};

use crate::{open_read_only, tenant_db_path};

const TABLES_SQL: &str = "SELECT table_name, comment FROM duckdb_tables() \
     WHERE schema_name = 'main' AND NOT internal ORDER BY table_name";

const COLUMNS_SQL: &str = "SELECT table_name, column_name, data_type, is_nullable, comment FROM duckdb_columns() \
     WHERE schema_name = 'main' AND NOT internal ORDER BY table_name, column_index";

const CONSTRAINTS_SQL: &str = "SELECT table_name, constraint_type, \
            array_to_string(constraint_column_names, ','), \
            coalesce(referenced_table, ''), \
            coalesce(array_to_string(referenced_column_names, ','), '') \
     FROM duckdb_constraints() \
     WHERE schema_name = 'main' AND constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY') \
     ORDER BY table_name, constraint_index";

/// Reads `<dir>/<tenant>.duckdb`, opened read-only for every load
#[derive(Debug, Clone)]
pub struct DuckSchemaStore {
    dir: PathBuf,
}

impl DuckSchemaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SchemaStore for DuckSchemaStore {
    async fn load(&self, tenant_id: &str) -> Result<TenantSchema, SchemaError> {
        validate_tenant_id(tenant_id)?;
        let dir = self.dir.clone();
        let tenant = tenant_id.to_string();

        let loaded = tokio::task::spawn_blocking(move || -> Result<Option<TenantSchema>, duckdb::Error> {
            match open_read_only(&dir, &tenant)? {
                Some(conn) => introspect(&conn, &tenant).map(Some),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| SchemaError::Backend(e.to_string()))?
        .map_err(|e| SchemaError::Backend(e.to_string()))?;

        let schema = loaded.ok_or_else(|| SchemaError::NotFound(tenant_id.to_string()))?;
        tracing::debug!(
            tenant = tenant_id,
            path = %tenant_db_path(&self.dir, tenant_id).display(),
            tables = schema.tables.len(),
            relationships = schema.relationships.len(),
            "Loaded tenant schema from DuckDB"
        );
        Ok(schema)
    }
}

/// Build a tenant schema from the `main` schema of an open database
pub fn introspect(conn: &Connection, tenant_id: &str) -> Result<TenantSchema, duckdb::Error> {
    let mut schema = TenantSchema::new(tenant_id);

    let mut stmt = conn.prepare(TABLES_SQL)?;
    let tables = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)))?;
    for table in tables {
        let (name, comment) = table?;
        schema.tables.push(Table {
            name,
            description: comment.filter(|c| !c.trim().is_empty()),
            columns: Vec::new(),
        });
    }

    let mut stmt = conn.prepare(COLUMNS_SQL)?;
    let columns = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, bool>(3)?,
            row.get::<_, Option<String>>(4)?,
        ))
    })?;
    for column in columns {
        let (table_name, name, data_type, nullable, comment) = column?;
        // views show up in duckdb_columns() but not in duckdb_tables()
        let Some(table) = schema.tables.iter_mut().find(|t| t.name == table_name) else {
            continue;
        };
        table.columns.push(Column {
            name,
            data_type,
            nullable,
            description: comment.filter(|c| !c.trim().is_empty()),
            primary_key: false,
        });
    }

    let mut stmt = conn.prepare(CONSTRAINTS_SQL)?;
    let constraints = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;
    for constraint in constraints {
        let (table_name, kind, columns, referenced_table, referenced_columns) = constraint?;
        let columns: Vec<&str> = split_names(&columns);

        if kind == "PRIMARY KEY" {
            if let Some(table) = schema.tables.iter_mut().find(|t| t.name == table_name) {
                for column in table.columns.iter_mut().filter(|c| columns.contains(&c.name.as_str())) {
                    column.primary_key = true;
                    column.nullable = false;
                }
            }
            continue;
        }

        // composite keys pair up by position
        for (column, target_column) in columns.iter().zip(split_names(&referenced_columns)) {
            schema.relationships.push(Relationship {
                table: table_name.clone(),
                column: column.to_string(),
                target_table: referenced_table.clone(),
                target_column: target_column.to_string(),
            });
        }
    }

    Ok(schema)
}

fn split_names(list: &str) -> Vec<&str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}
