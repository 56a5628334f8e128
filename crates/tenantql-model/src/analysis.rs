//! Ephemeral per-call analysis records

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
}

/// Structural facts about a canonical query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub complexity: Complexity,
    pub tables_referenced: Vec<String>,
    pub columns_referenced: Vec<String>,
    pub has_join: bool,
    pub has_aggregation: bool,
    pub has_derived_field: bool,
    pub has_subquery: bool,

    /// Canonical fields with a derived mapping that the query touches,
    /// including those pulled in by `SELECT *`
    #[serde(default)]
    pub derived_fields: Vec<String>,
}

impl QueryAnalysis {
    pub fn is_simple(&self) -> bool {
        self.complexity == Complexity::Simple
    }

    pub fn references_column(&self, name: &str) -> bool {
        self.columns_referenced
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Inner => write!(f, "INNER JOIN"),
            JoinType::Left => write!(f, "LEFT JOIN"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStep {
    pub table: String,
    pub join_type: JoinType,
    pub condition: String,
}

/// Proposed way of reaching every needed tenant table from the primary one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinStrategy {
    pub primary_table: String,
    pub joins: Vec<JoinStep>,
    pub confidence: f64,

    /// Tables that were needed but could not be connected
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unreachable: Vec<String>,
}

impl JoinStrategy {
    pub fn single(primary_table: impl Into<String>) -> Self {
        Self {
            primary_table: primary_table.into(),
            joins: Vec::new(),
            confidence: 1.0,
            unreachable: Vec::new(),
        }
    }

    /// Render as a FROM clause fragment, e.g. `awards LEFT JOIN recipients ON ...`
    pub fn to_sql(&self) -> String {
        let mut sql = self.primary_table.clone();
        for join in &self.joins {
            sql.push_str(&format!("\n{} {} ON {}", join.join_type, join.table, join.condition));
        }
        sql
    }
}
