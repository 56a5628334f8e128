//! DuckDB adapters for the translation engine
//!
//! One database file per tenant (`<dir>/<tenant>.duckdb`) supplies both the
//! schema and the data the translated SQL runs against. Mapping records can
//! live in a separate DuckDB file shared by every tenant.

mod executor;
mod schema;
mod store;

pub use executor::{DuckExecutor, ExecutionLimits};
pub use schema::{introspect, DuckSchemaStore};
pub use store::DuckMappingStore;

use std::path::{Path, PathBuf};

/// Location of a tenant's database under `dir`
pub fn tenant_db_path(dir: &Path, tenant_id: &str) -> PathBuf {
    dir.join(format!("{}.duckdb", tenant_id))
}

/// Open a tenant database without write access, or `None` when the file is absent
fn open_read_only(dir: &Path, tenant_id: &str) -> Result<Option<duckdb::Connection>, duckdb::Error> {
    let path = tenant_db_path(dir, tenant_id);
    if !path.exists() {
        return Ok(None);
    }
    let config = duckdb::Config::default().access_mode(duckdb::AccessMode::ReadOnly)?;
    duckdb::Connection::open_with_flags(&path, config).map(Some)
}
