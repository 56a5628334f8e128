//! Query Classifier
//!
//! A query is `simple` only when a token-level rewrite is guaranteed to be
//! correct: one mapped canonical table, no joins, no aggregation, no derived
//! fields. Anything the structural scan cannot see through (subqueries, set
//! operations, CTEs, unmapped tables) is `complex`.

use tenantql_model::{CanonicalSchema, Complexity, MappingKind, MappingSet, QueryAnalysis};
use tenantql_sql::Statement;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Only SELECT queries can be translated, got {0}")]
    NotSelect(String),

    #[error("Query references no table")]
    NoTable,

    #[error("Expected exactly one statement, found {0}")]
    MultipleStatements(usize),
}

pub fn classify(
    stmt: &Statement,
    mappings: &MappingSet,
    canonical: &CanonicalSchema,
) -> Result<QueryAnalysis, ClassifyError> {
    match stmt.leading_keyword().as_deref() {
        Some("SELECT") | Some("WITH") => {}
        Some(other) => return Err(ClassifyError::NotSelect(other.to_string())),
        None => return Err(ClassifyError::NotSelect("empty query".to_string())),
    }
    let statements = stmt.statement_count();
    if statements > 1 {
        return Err(ClassifyError::MultipleStatements(statements));
    }

    let mut tables: Vec<String> = Vec::new();
    for t in stmt.tables() {
        if !tables.iter().any(|x| x.eq_ignore_ascii_case(&t.name)) {
            tables.push(t.name.clone());
        }
    }
    if tables.is_empty() {
        return Err(ClassifyError::NoTable);
    }

    let mut columns: Vec<String> = Vec::new();
    for c in stmt.bare_columns().into_iter().chain(stmt.qualified_columns()) {
        if !columns.iter().any(|x| x.eq_ignore_ascii_case(&c.column)) {
            columns.push(c.column);
        }
    }

    let canonical_tables: Vec<&String> = tables.iter().filter(|t| canonical.is_table(t)).collect();

    // derived fields named explicitly, or pulled in through a wildcard
    let mut derived_fields: Vec<String> = Vec::new();
    for d in &mappings.derived_mappings {
        let owned_by_query = canonical
            .field(&d.canonical_field)
            .map(|(table, _)| canonical_tables.iter().any(|t| t.eq_ignore_ascii_case(&table.name)))
            .unwrap_or(false);
        let named = columns.iter().any(|c| c.eq_ignore_ascii_case(&d.canonical_field));
        if owned_by_query && (named || stmt.has_wildcard()) {
            derived_fields.push(d.canonical_field.clone());
        }
    }

    let has_join = stmt.has_join();
    let has_aggregation = stmt.has_aggregation();
    let has_subquery = stmt.has_subquery() || stmt.has_set_operation() || !stmt.ctes().is_empty();
    let has_derived_field = !derived_fields.is_empty();

    let simple = canonical_tables.len() == 1
        && tables.len() == 1
        && !has_join
        && !has_aggregation
        && !has_derived_field
        && !has_subquery
        && direct_mappings_stay_on_table(&tables[0], &columns, mappings);

    Ok(QueryAnalysis {
        complexity: if simple { Complexity::Simple } else { Complexity::Complex },
        tables_referenced: tables,
        columns_referenced: columns,
        has_join,
        has_aggregation,
        has_derived_field,
        has_subquery,
        derived_fields,
    })
}

/// A field mapped onto a different tenant table needs a join, so the query
/// cannot be rewritten in place
fn direct_mappings_stay_on_table(canonical_table: &str, columns: &[String], mappings: &MappingSet) -> bool {
    let Some(table) = mappings.table(canonical_table) else {
        return false;
    };
    columns.iter().all(|c| match mappings.field(c) {
        Some(f) if f.kind == MappingKind::Direct => f.target_table.eq_ignore_ascii_case(&table.tenant_table),
        Some(_) => false,
        None => true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::awards_mappings;

    fn analyze(sql: &str) -> QueryAnalysis {
        let stmt = Statement::parse(sql).unwrap();
        classify(&stmt, &awards_mappings(), &CanonicalSchema::builtin()).unwrap()
    }

    #[test]
    fn test_single_table_without_derived_is_simple() {
        let analysis = analyze("SELECT contract_id, title FROM contracts WHERE value_amount > 1000");
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert_eq!(analysis.tables_referenced, vec!["contracts"]);
        assert_eq!(analysis.columns_referenced, vec!["contract_id", "title", "value_amount"]);
        assert!(!analysis.has_derived_field);
    }

    #[test]
    fn test_derived_field_is_complex() {
        let analysis = analyze("SELECT contract_id, status FROM contracts WHERE status='active'");
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert!(analysis.has_derived_field);
        assert_eq!(analysis.derived_fields, vec!["status"]);
        assert!(!analysis.has_join);
    }

    #[test]
    fn test_wildcard_pulls_in_derived_fields() {
        let analysis = analyze("SELECT * FROM contracts");
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert_eq!(analysis.derived_fields, vec!["status"]);
    }

    #[test]
    fn test_join_and_aggregation_are_complex() {
        assert!(analyze("SELECT c.title, p.name FROM contracts c JOIN parties p ON c.buyer_party_id = p.party_id").has_join);
        let agg = analyze("SELECT COUNT(*) FROM contracts");
        assert!(agg.has_aggregation);
        assert_eq!(agg.complexity, Complexity::Complex);
    }

    #[test]
    fn test_hidden_derived_field_in_subquery_is_complex() {
        let analysis = analyze(
            "SELECT contract_id FROM contracts WHERE contract_id IN (SELECT contract_id FROM contracts WHERE status = 'active')",
        );
        assert_eq!(analysis.complexity, Complexity::Complex);
        assert!(analysis.has_subquery);
    }

    #[test]
    fn test_unknown_table_is_complex() {
        assert_eq!(analyze("SELECT * FROM bids").complexity, Complexity::Complex);
    }

    #[test]
    fn test_field_on_other_tenant_table_is_complex() {
        let analysis = analyze("SELECT contract_id, value_amount FROM contracts");
        assert_eq!(analysis.complexity, Complexity::Simple);

        let mut mappings = awards_mappings();
        for f in mappings.field_mappings.iter_mut() {
            if f.canonical_field == "value_amount" {
                f.target_table = "award_financials".to_string();
            }
        }
        let stmt = Statement::parse("SELECT contract_id, value_amount FROM contracts").unwrap();
        let analysis = classify(&stmt, &mappings, &CanonicalSchema::builtin()).unwrap();
        assert_eq!(analysis.complexity, Complexity::Complex);
    }

    #[test]
    fn test_rejects_non_select() {
        let stmt = Statement::parse("DELETE FROM contracts").unwrap();
        assert!(matches!(
            classify(&stmt, &awards_mappings(), &CanonicalSchema::builtin()),
            Err(ClassifyError::NotSelect(k)) if k == "DELETE"
        ));
        let stmt = Statement::parse("SELECT 1").unwrap();
        assert!(matches!(
            classify(&stmt, &awards_mappings(), &CanonicalSchema::builtin()),
            Err(ClassifyError::NoTable)
        ));
        let stmt = Statement::parse("SELECT title FROM contracts; SELECT 2").unwrap();
        assert!(matches!(
            classify(&stmt, &awards_mappings(), &CanonicalSchema::builtin()),
            Err(ClassifyError::MultipleStatements(2))
        ));
    }
}
