//! Tenant schema definitions
//!
//! A tenant schema is loaded once per process and never mutated afterwards.
//! All name lookups are case-insensitive because tenant SQL is.

use serde::{Deserialize, Serialize};

/// Column metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,

    #[serde(rename = "type")]
    pub data_type: String,

    #[serde(default = "default_nullable")]
    pub nullable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub primary_key: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            description: None,
            primary_key: false,
        }
    }

    /// Mark as primary key (implies NOT NULL)
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Table with its ordered columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            description: None,
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Declared foreign key: `table.column` references `target_table.target_column`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub table: String,
    pub column: String,
    pub target_table: String,
    pub target_column: String,
}

/// One tenant's physical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSchema {
    pub tenant_id: String,
    pub tables: Vec<Table>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

impl TenantSchema {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tables: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_relationship(
        mut self,
        table: &str,
        column: &str,
        target_table: &str,
        target_column: &str,
    ) -> Self {
        self.relationships.push(Relationship {
            table: table.to_string(),
            column: column.to_string(),
            target_table: target_table.to_string(),
            target_column: target_column.to_string(),
        });
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&Column> {
        self.table(table).and_then(|t| t.column(column))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Tables that own a column with this name
    pub fn tables_with_column(&self, column: &str) -> Vec<&Table> {
        self.tables.iter().filter(|t| t.has_column(column)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn awards() -> TenantSchema {
        TenantSchema::new("acme")
            .with_table(Table::new(
                "awards",
                vec![
                    Column::new("generated_unique_award_id", "VARCHAR").primary_key(),
                    Column::new("period_start", "DATE"),
                    Column::new("period_end", "DATE"),
                    Column::new("recipient_id", "INTEGER"),
                ],
            ))
            .with_table(Table::new(
                "recipients",
                vec![Column::new("id", "INTEGER").primary_key()],
            ))
    }

    #[test]
    fn test_lookups_are_case_insensitive() {
        let schema = awards();
        assert!(schema.has_table("AWARDS"));
        assert!(schema.column("Awards", "PERIOD_END").is_some());
        assert!(schema.column("awards", "status").is_none());
    }

    #[test]
    fn test_primary_key_implies_not_null() {
        let schema = awards();
        let pk = schema.column("awards", "generated_unique_award_id").unwrap();
        assert!(pk.primary_key);
        assert!(!pk.nullable);
        assert_eq!(
            schema.table("recipients").unwrap().primary_keys().count(),
            1
        );
    }

    #[test]
    fn test_tables_with_column() {
        let schema = awards();
        let owners = schema.tables_with_column("id");
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].name, "recipients");
    }

    #[test]
    fn test_column_deserializes_with_defaults() {
        let column: Column = serde_json::from_str(r#"{"name":"title","type":"VARCHAR"}"#).unwrap();
        assert!(column.nullable);
        assert!(!column.primary_key);
        assert!(column.description.is_none());
    }
}
