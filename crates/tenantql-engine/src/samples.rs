//! Sample rows shown next to the tenant schema in prompts

use std::fmt::Write as _;

use crate::executor::{QueryResult, SampleSource};

/// Values longer than this are cut in prompts
const MAX_VALUE_CHARS: usize = 40;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSamples {
    tables: Vec<(String, QueryResult)>,
}

impl TableSamples {
    pub fn insert(&mut self, table: impl Into<String>, rows: QueryResult) {
        self.tables.push((table.into(), rows));
    }

    pub fn get(&self, table: &str) -> Option<&QueryResult> {
        self.tables
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(table))
            .map(|(_, rows)| rows)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Up to `rows` rows of each table. A table that cannot be read is left out.
    pub async fn collect(source: &dyn SampleSource, tenant_id: &str, tables: &[String], rows: usize) -> Self {
        let mut samples = Self::default();
        if rows == 0 {
            return samples;
        }
        for table in tables {
            match source.sample(tenant_id, table, rows).await {
                Ok(result) if result.row_count > 0 => samples.insert(table.clone(), result),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(tenant = tenant_id, table = %table, error = %e, "Sample rows unavailable");
                }
            }
        }
        samples
    }

    /// Prompt section for `tables`; empty when none of them has rows
    pub fn render(&self, tables: &[&str]) -> String {
        let mut body = String::new();
        for table in tables {
            let Some(result) = self.get(table) else {
                continue;
            };
            let _ = writeln!(body, "{} ({}):", table, result.columns.join(", "));
            for row in &result.rows {
                let values: Vec<String> = row.iter().map(display_value).collect();
                let _ = writeln!(body, "  {}", values.join(" | "));
            }
        }
        if body.is_empty() {
            return body;
        }
        format!("=== SAMPLE ROWS ===\n{}\n", body)
    }
}

fn display_value(value: &serde_json::Value) -> String {
    let text = match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.chars().count() <= MAX_VALUE_CHARS {
        return text;
    }
    let cut: String = text.chars().take(MAX_VALUE_CHARS).collect();
    format!("{}...", cut)
}
