//! Validation and translation results

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::JoinStrategy;

/// One reason a translated query cannot be trusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    MissingTable {
        table: String,
        available: Vec<String>,
    },
    MissingColumn {
        table: String,
        column: String,
        suggestions: Vec<String>,
    },
    UnknownQualifier {
        qualifier: String,
        column: String,
    },
    DerivedNotApplied {
        field: String,
        expression: String,
    },
    DerivedAsBareColumn {
        field: String,
        column: String,
    },
    /// The SQL could not be tokenized or was empty
    Unreadable {
        message: String,
    },
    /// A string literal in a value position that reads as an instruction
    InstructionLiteral {
        alias: String,
        text: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingTable { table, available } => write!(
                f,
                "table {} does not exist; available: {}",
                table,
                available.join(", ")
            ),
            ValidationIssue::MissingColumn {
                table,
                column,
                suggestions,
            } => {
                write!(f, "column {} does not exist in table {}", column, table)?;
                if !suggestions.is_empty() {
                    write!(f, "; did you mean: {}", suggestions.join(", "))?;
                }
                Ok(())
            }
            ValidationIssue::UnknownQualifier { qualifier, column } => write!(
                f,
                "{}.{} uses qualifier {} which is not a table or alias in the query",
                qualifier, column, qualifier
            ),
            ValidationIssue::DerivedNotApplied { field, expression } => write!(
                f,
                "derived field {} must use its registered expression verbatim: {}",
                field, expression
            ),
            ValidationIssue::DerivedAsBareColumn { field, column } => write!(
                f,
                "derived field {} is bound to bare column {}; use the registered expression",
                field, column
            ),
            ValidationIssue::Unreadable { message } => {
                write!(f, "translated SQL could not be read: {}", message)
            }
            ValidationIssue::InstructionLiteral { alias, text } => write!(
                f,
                "{} is bound to instruction text '{}' instead of a value; emit executable SQL only",
                alias, text
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub referenced_tables: Vec<String>,
    pub referenced_columns: Vec<String>,
}

impl ValidationResult {
    pub fn new(
        errors: Vec<ValidationIssue>,
        referenced_tables: Vec<String>,
        referenced_columns: Vec<String>,
    ) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            referenced_tables,
            referenced_columns,
        }
    }

    /// Union of two independent passes over the same SQL
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        for t in other.referenced_tables {
            if !self.referenced_tables.contains(&t) {
                self.referenced_tables.push(t);
            }
        }
        for c in other.referenced_columns {
            if !self.referenced_columns.contains(&c) {
                self.referenced_columns.push(c);
            }
        }
        self.valid = self.errors.is_empty();
        self
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationPath {
    Direct,
    Generated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanComplexity {
    Low,
    Medium,
    High,
}

/// Shape of a translated query as seen by whoever decides to run it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub tables_involved: Vec<String>,
    pub join_count: usize,
    pub estimated_complexity: PlanComplexity,

    /// `table.column` pairs used as join keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_indexes: Vec<String>,
}

/// What `translate` hands back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    pub original_query: String,
    pub translated_query: String,
    pub tenant_id: String,
    pub confidence: f64,
    pub reasoning: String,
    pub warnings: Vec<String>,
    pub validation_errors: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_strategy: Option<JoinStrategy>,

    pub path: TranslationPath,

    /// Generation calls made for this result (0 on the direct path)
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performance_hints: Vec<String>,
}

impl TranslationResult {
    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty() && !self.translated_query.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_messages() {
        let missing = ValidationIssue::MissingTable {
            table: "bids".to_string(),
            available: vec!["awards".to_string(), "recipients".to_string()],
        };
        assert_eq!(
            missing.to_string(),
            "table bids does not exist; available: awards, recipients"
        );

        let column = ValidationIssue::MissingColumn {
            table: "awards".to_string(),
            column: "perod_end".to_string(),
            suggestions: vec!["period_end".to_string()],
        };
        assert_eq!(
            column.to_string(),
            "column perod_end does not exist in table awards; did you mean: period_end"
        );
    }

    #[test]
    fn test_merge_is_union() {
        let a = ValidationResult::new(vec![], vec!["awards".to_string()], vec![]);
        let b = ValidationResult::new(
            vec![ValidationIssue::DerivedAsBareColumn {
                field: "status".to_string(),
                column: "award_type".to_string(),
            }],
            vec!["awards".to_string()],
            vec!["award_type".to_string()],
        );
        let merged = a.merge(b);
        assert!(!merged.valid);
        assert_eq!(merged.referenced_tables, vec!["awards"]);
        assert_eq!(merged.messages().len(), 1);
    }
}
