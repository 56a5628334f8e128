//! Read-only, bounded execution of translated SQL against a tenant database

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tenantql_engine::sql::Statement;
use tenantql_engine::{validate_tenant_id, ExecutionError, QueryExecutor, QueryResult, SampleSource};
use tokio::sync::oneshot;

use crate::open_read_only;

/// Row and time bounds applied to every statement
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionLimits {
    pub max_rows: usize,
    pub timeout_secs: u64,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DuckExecutor {
    dir: PathBuf,
    limits: ExecutionLimits,
}

impl DuckExecutor {
    pub fn new(dir: impl Into<PathBuf>, limits: ExecutionLimits) -> Self {
        Self {
            dir: dir.into(),
            limits,
        }
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.limits
    }
}

/// Reject anything but a single SELECT/WITH, then cap the row count
pub(crate) fn bounded_sql(sql: &str, max_rows: usize) -> Result<String, ExecutionError> {
    let stmt = Statement::parse(sql).map_err(|e| ExecutionError::Rejected(e.to_string()))?;
    match stmt.leading_keyword().as_deref() {
        Some("SELECT") | Some("WITH") => {}
        Some(other) => return Err(ExecutionError::Rejected(format!("{} statements are not executed", other))),
        None => return Err(ExecutionError::Rejected("empty statement".to_string())),
    }
    if stmt.statement_count() != 1 {
        return Err(ExecutionError::Rejected("exactly one statement is executed".to_string()));
    }

    // cut after the last significant token so a trailing comment cannot swallow the LIMIT
    let end = stmt
        .tokens()
        .iter()
        .rev()
        .find(|t| !t.is_trivia() && !t.is_symbol(";"))
        .map(|t| t.offset + t.text.len())
        .unwrap_or(0);
    let body = sql.get(..end).unwrap_or(sql).trim();
    if stmt.has_limit() {
        Ok(body.to_string())
    } else {
        Ok(format!("{} LIMIT {}", body, max_rows))
    }
}

fn run(conn: &Connection, sql: &str, max_rows: usize) -> Result<QueryResult, duckdb::Error> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let columns = rows.as_ref().map(|s| s.column_names()).unwrap_or_default();

    let mut result_rows = Vec::new();
    while let Some(row) = rows.next()? {
        let mut json_row = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            json_row.push(to_json(row.get_ref(i)?));
        }
        result_rows.push(json_row);
        // a LIMIT already written in the query may exceed ours
        if result_rows.len() >= max_rows {
            break;
        }
    }

    Ok(QueryResult {
        columns,
        row_count: result_rows.len(),
        rows: result_rows,
    })
}

fn to_json(value: ValueRef<'_>) -> serde_json::Value {
    use serde_json::Value;
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(i) => Value::from(i),
        ValueRef::SmallInt(i) => Value::from(i),
        ValueRef::Int(i) => Value::from(i),
        ValueRef::BigInt(i) => Value::from(i),
        ValueRef::HugeInt(i) => i64::try_from(i).map(Value::from).unwrap_or_else(|_| Value::String(i.to_string())),
        ValueRef::UTinyInt(i) => Value::from(i),
        ValueRef::USmallInt(i) => Value::from(i),
        ValueRef::UInt(i) => Value::from(i),
        ValueRef::UBigInt(i) => Value::from(i),
        ValueRef::Float(f) => serde_json::json!(f),
        ValueRef::Double(f) => serde_json::json!(f),
        // strings keep the exact scale
        ValueRef::Decimal(d) => Value::String(d.to_string()),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Date32(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|epoch| epoch.checked_add_signed(ChronoDuration::days(i64::from(days))))
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        ValueRef::Timestamp(unit, v) => {
            let micros = match unit {
                TimeUnit::Second => v.saturating_mul(1_000_000),
                TimeUnit::Millisecond => v.saturating_mul(1_000),
                TimeUnit::Microsecond => v,
                TimeUnit::Nanosecond => v / 1_000,
            };
            chrono::DateTime::from_timestamp_micros(micros)
                .map(|t| Value::String(t.naive_utc().to_string()))
                .unwrap_or(Value::Null)
        }
        other => {
            tracing::trace!(value = ?other, "Unsupported value type returned as null");
            Value::Null
        }
    }
}

impl DuckExecutor {
    /// Run on a blocking thread; on timeout the query is interrupted inside DuckDB
    async fn run_bounded(&self, tenant_id: &str, sql: String, max_rows: usize) -> Result<QueryResult, ExecutionError> {
        let timeout = Duration::from_secs(self.limits.timeout_secs);
        let dir = self.dir.clone();
        let tenant = tenant_id.to_string();
        let (handle_tx, mut handle_rx) = oneshot::channel();

        let task = tokio::task::spawn_blocking(move || -> Result<QueryResult, ExecutionError> {
            let conn = open_read_only(&dir, &tenant)
                .map_err(ExecutionError::backend)?
                .ok_or_else(|| ExecutionError::UnknownTenant(tenant.clone()))?;
            let _ = handle_tx.send(conn.interrupt_handle());
            run(&conn, &sql, max_rows).map_err(ExecutionError::backend)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined.map_err(ExecutionError::backend)?,
            Err(_) => {
                if let Ok(handle) = handle_rx.try_recv() {
                    handle.interrupt();
                }
                tracing::warn!(tenant = tenant_id, ?timeout, "Query execution timed out");
                Err(ExecutionError::Timeout(timeout))
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for DuckExecutor {
    async fn execute(&self, tenant_id: &str, sql: &str) -> Result<QueryResult, ExecutionError> {
        validate_tenant_id(tenant_id).map_err(|_| ExecutionError::UnknownTenant(tenant_id.to_string()))?;
        let bounded = bounded_sql(sql, self.limits.max_rows)?;

        tracing::debug!(tenant = tenant_id, sql = %bounded, "Executing translated query");
        let result = self.run_bounded(tenant_id, bounded, self.limits.max_rows).await?;
        tracing::info!(tenant = tenant_id, rows = result.row_count, "Executed translated query");
        Ok(result)
    }
}

#[async_trait]
impl SampleSource for DuckExecutor {
    async fn sample(&self, tenant_id: &str, table: &str, rows: usize) -> Result<QueryResult, ExecutionError> {
        validate_tenant_id(tenant_id).map_err(|_| ExecutionError::UnknownTenant(tenant_id.to_string()))?;
        let rows = rows.min(self.limits.max_rows);
        let sql = format!("SELECT * FROM \"{}\" LIMIT {}", table.replace('"', "\"\""), rows);
        tracing::trace!(tenant = tenant_id, table, rows, "Sampling tenant table");
        self.run_bounded(tenant_id, sql, rows).await
    }
}
