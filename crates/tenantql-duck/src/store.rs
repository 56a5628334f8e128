//! Durable mapping records in a DuckDB table

use async_trait::async_trait;
use duckdb::{params, Connection, OptionalExt};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tenantql_engine::model::MappingSet;
use tenantql_engine::{MappingStore, StoreError};

const CREATE_SQL: &str = "CREATE TABLE IF NOT EXISTS tenant_mappings (
    tenant_id VARCHAR PRIMARY KEY,
    record VARCHAR NOT NULL,
    updated_at TIMESTAMP NOT NULL
)";

/// One row per tenant holding the serialized mapping record. Writes replace
/// the row in a single statement, so readers never see a partial record.
#[derive(Clone)]
pub struct DuckMappingStore {
    conn: Arc<Mutex<Connection>>,
}

fn db(e: duckdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl DuckMappingStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(db)?;
        tracing::info!(path = %path.display(), "Opened DuckDB mapping store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().map_err(db)?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(CREATE_SQL).map_err(db)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("mapping store connection poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

fn read(conn: &Connection, tenant_id: &str) -> Result<Option<MappingSet>, StoreError> {
    let record: Option<String> = conn
        .query_row(
            "SELECT record FROM tenant_mappings WHERE tenant_id = ?",
            params![tenant_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db)?;
    match record {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write(conn: &Connection, mappings: &MappingSet) -> Result<(), StoreError> {
    let json = serde_json::to_string(mappings)?;
    conn.execute(
        "INSERT OR REPLACE INTO tenant_mappings VALUES (?, ?, now())",
        params![mappings.tenant_id, json],
    )
    .map_err(db)?;
    Ok(())
}

#[async_trait]
impl MappingStore for DuckMappingStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<MappingSet>, StoreError> {
        let tenant = tenant_id.to_string();
        self.with_conn(move |conn| read(conn, &tenant)).await
    }

    async fn put(&self, mappings: &MappingSet) -> Result<(), StoreError> {
        let mappings = mappings.clone();
        self.with_conn(move |conn| write(conn, &mappings)).await?;
        tracing::debug!("Stored mapping record");
        Ok(())
    }

    async fn touch(&self, tenant_id: &str) -> Result<(), StoreError> {
        let tenant = tenant_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(db)?;
            if let Some(mut record) = read(&tx, &tenant)? {
                record.touch();
                write(&tx, &record)?;
            }
            tx.commit().map_err(db)
        })
        .await
    }

    async fn clear(&self, tenant_id: &str) -> Result<bool, StoreError> {
        let tenant = tenant_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn
                .execute("DELETE FROM tenant_mappings WHERE tenant_id = ?", params![tenant])
                .map_err(db)?;
            Ok(removed > 0)
        })
        .await
    }

    async fn tenants(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT tenant_id FROM tenant_mappings ORDER BY tenant_id")
                .map_err(db)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0)).map_err(db)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db)
        })
        .await
    }
}

impl std::fmt::Debug for DuckMappingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckMappingStore").finish_non_exhaustive()
    }
}
