//! Shared test data: a federal-awards tenant mapped onto the procurement vocabulary

use tenantql_model::{
    Column, DerivedMapping, FieldMapping, MappingKind, MappingSet, Table, TableMapping, TenantSchema,
    UnmappedField,
};

pub const STATUS_CASE: &str =
    "CASE WHEN period_end>=CURRENT_DATE AND period_start<=CURRENT_DATE THEN 'active' ELSE 'inactive' END";

pub fn awards_schema() -> TenantSchema {
    TenantSchema::new("acme")
        .with_table(Table::new(
            "awards",
            vec![
                Column::new("generated_unique_award_id", "VARCHAR").primary_key(),
                Column::new("description", "VARCHAR"),
                Column::new("total_obligation", "DECIMAL(18,2)"),
                Column::new("action_date", "DATE"),
                Column::new("period_start", "DATE"),
                Column::new("period_end", "DATE"),
                Column::new("recipient_id", "INTEGER").not_null(),
                Column::new("awarding_agency_id", "INTEGER"),
            ],
        ))
        .with_table(Table::new(
            "recipients",
            vec![
                Column::new("id", "INTEGER").primary_key(),
                Column::new("legal_name", "VARCHAR"),
                Column::new("email", "VARCHAR"),
            ],
        ))
        .with_relationship("awards", "recipient_id", "recipients", "id")
}

fn direct(table: &str, field: &str, target_table: &str, column: &str, confidence: f64) -> FieldMapping {
    FieldMapping {
        canonical_table: table.to_string(),
        canonical_field: field.to_string(),
        target_table: target_table.to_string(),
        target_column: Some(column.to_string()),
        confidence,
        kind: MappingKind::Direct,
    }
}

pub fn awards_mappings() -> MappingSet {
    let mut set = MappingSet::new("acme");
    set.canonical_version = "1".to_string();
    set.table_mappings = vec![
        TableMapping {
            canonical_table: "contracts".to_string(),
            tenant_table: "awards".to_string(),
            confidence: 0.95,
        },
        TableMapping {
            canonical_table: "parties".to_string(),
            tenant_table: "recipients".to_string(),
            confidence: 0.9,
        },
    ];
    set.field_mappings = vec![
        direct("contracts", "contract_id", "awards", "generated_unique_award_id", 0.95),
        direct("contracts", "title", "awards", "description", 0.85),
        direct("contracts", "date_signed", "awards", "action_date", 0.8),
        direct("contracts", "period_start", "awards", "period_start", 1.0),
        direct("contracts", "period_end", "awards", "period_end", 1.0),
        direct("contracts", "value_amount", "awards", "total_obligation", 0.9),
        direct("contracts", "buyer_party_id", "awards", "awarding_agency_id", 0.75),
        FieldMapping {
            canonical_table: "contracts".to_string(),
            canonical_field: "status".to_string(),
            target_table: "awards".to_string(),
            target_column: None,
            confidence: 0.85,
            kind: MappingKind::Derived,
        },
        direct("parties", "party_id", "recipients", "id", 0.95),
        direct("parties", "name", "recipients", "legal_name", 0.9),
        direct("parties", "contact_email", "recipients", "email", 0.8),
    ];
    set.derived_mappings = vec![DerivedMapping {
        canonical_field: "status".to_string(),
        expression: STATUS_CASE.to_string(),
        confidence: 0.85,
        source_table: Some("awards".to_string()),
    }];
    set.unmapped = vec![
        UnmappedField {
            canonical_table: "contracts".to_string(),
            canonical_field: "value_currency".to_string(),
            reason: "no currency column".to_string(),
        },
        UnmappedField {
            canonical_table: "contracts".to_string(),
            canonical_field: "supplier_party_ids".to_string(),
            reason: "confidence 0.40 below floor 0.70".to_string(),
        },
        UnmappedField {
            canonical_table: "parties".to_string(),
            canonical_field: "role".to_string(),
            reason: "no role column".to_string(),
        },
    ];
    set
}
