//! Canonical vocabulary that every incoming query is written against

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CanonicalError {
    #[error("Canonical field '{field}' is declared by both '{first}' and '{second}'")]
    DuplicateField {
        field: String,
        first: String,
        second: String,
    },

    #[error("Canonical table '{0}' declares no fields")]
    EmptyTable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Date,
    Timestamp,
    Boolean,
    TextList,
}

impl FieldType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            FieldType::Text => "VARCHAR",
            FieldType::Integer => "BIGINT",
            FieldType::Decimal => "DECIMAL",
            FieldType::Date => "DATE",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Boolean => "BOOLEAN",
            FieldType::TextList => "VARCHAR[]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalField {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub required: bool,

    /// Closed set of allowed values, when the field is an enum
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTable {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub fields: Vec<CanonicalField>,
}

impl CanonicalTable {
    pub fn field(&self, name: &str) -> Option<&CanonicalField> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }
}

/// Process-wide constant vocabulary, grouped by canonical table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSchema {
    pub version: String,
    pub tables: Vec<CanonicalTable>,
}

impl CanonicalSchema {
    /// The procurement vocabulary (contracts and parties)
    pub fn builtin() -> Self {
        let mut schema = Self {
            version: "1".to_string(),
            tables: Vec::new(),
        };
        schema.register_builtins();
        schema
    }

    fn register_builtins(&mut self) {
        self.register(CanonicalTable {
            name: "contracts".to_string(),
            description: Some("Procurement contracts, one row per contract".to_string()),
            fields: vec![
                field("contract_id", FieldType::Text, true, "Unique contract identifier"),
                field("title", FieldType::Text, false, "Short contract title"),
                CanonicalField {
                    allowed_values: Some(
                        ["pending", "active", "cancelled", "terminated", "expired"]
                            .iter()
                            .map(|s| s.to_string())
                            .collect(),
                    ),
                    ..field("status", FieldType::Text, true, "Lifecycle status of the contract")
                },
                field("date_signed", FieldType::Date, false, "Date the contract was signed"),
                field("period_start", FieldType::Date, false, "Start of the performance period"),
                field("period_end", FieldType::Date, false, "End of the performance period"),
                field("value_amount", FieldType::Decimal, false, "Contract value"),
                field("value_currency", FieldType::Text, false, "ISO 4217 currency of value_amount"),
                field("buyer_party_id", FieldType::Text, false, "Party that issued the contract"),
                field(
                    "supplier_party_ids",
                    FieldType::TextList,
                    false,
                    "Parties supplying under the contract",
                ),
            ],
        });

        self.register(CanonicalTable {
            name: "parties".to_string(),
            description: Some("Buyers and suppliers".to_string()),
            fields: vec![
                field("party_id", FieldType::Text, true, "Unique party identifier"),
                field("name", FieldType::Text, true, "Legal name"),
                field("role", FieldType::Text, false, "buyer or supplier"),
                field("contact_email", FieldType::Text, false, "Primary contact address"),
            ],
        });
    }

    pub fn register(&mut self, table: CanonicalTable) {
        self.tables.retain(|t| !t.name.eq_ignore_ascii_case(&table.name));
        self.tables.push(table);
    }

    /// Reject vocabularies where a field name is ambiguous across tables
    pub fn validate(&self) -> Result<(), CanonicalError> {
        let mut seen: Vec<(&str, &str)> = Vec::new();
        for table in &self.tables {
            if table.fields.is_empty() {
                return Err(CanonicalError::EmptyTable(table.name.clone()));
            }
            for f in &table.fields {
                if let Some((_, owner)) = seen.iter().find(|(n, _)| n.eq_ignore_ascii_case(&f.name)) {
                    return Err(CanonicalError::DuplicateField {
                        field: f.name.clone(),
                        first: owner.to_string(),
                        second: table.name.clone(),
                    });
                }
                seen.push((&f.name, &table.name));
            }
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&CanonicalTable> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn is_table(&self, name: &str) -> bool {
        self.table(name).is_some()
    }

    /// Find a field and the table declaring it
    pub fn field(&self, name: &str) -> Option<(&CanonicalTable, &CanonicalField)> {
        self.tables
            .iter()
            .find_map(|t| t.field(name).map(|f| (t, f)))
    }
}

fn field(name: &str, field_type: FieldType, required: bool, description: &str) -> CanonicalField {
    CanonicalField {
        name: name.to_string(),
        field_type,
        required,
        allowed_values: None,
        description: Some(description.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_vocabulary() {
        let schema = CanonicalSchema::builtin();
        assert!(schema.is_table("contracts"));
        assert!(schema.is_table("PARTIES"));
        assert_eq!(schema.table("contracts").unwrap().fields.len(), 10);

        let (table, status) = schema.field("status").unwrap();
        assert_eq!(table.name, "contracts");
        assert!(status.allowed_values.as_ref().unwrap().contains(&"active".to_string()));
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut schema = CanonicalSchema::builtin();
        schema.register(CanonicalTable {
            name: "awards".to_string(),
            description: None,
            fields: vec![field("title", FieldType::Text, false, "clashes with contracts")],
        });
        assert!(matches!(
            schema.validate(),
            Err(CanonicalError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_register_replaces_table() {
        let mut schema = CanonicalSchema::builtin();
        schema.register(CanonicalTable {
            name: "Parties".to_string(),
            description: None,
            fields: vec![field("party_id", FieldType::Text, true, "id")],
        });
        assert_eq!(schema.tables.len(), 2);
        assert_eq!(schema.table("parties").unwrap().fields.len(), 1);
    }
}
