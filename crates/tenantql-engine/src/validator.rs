//! Validator: derived-field fidelity and schema grounding
//!
//! The two passes are independent and pure. The final result is their union;
//! an empty error list means the SQL is valid.

use tenantql_model::{MappingSet, QueryAnalysis, TenantSchema, ValidationIssue, ValidationResult};
use tenantql_sql::{contains_sequence, normalized_tokens, Statement, TokenKind};

const MAX_SUGGESTIONS: usize = 3;

/// Leading words of literals that describe work instead of holding a value
const INSTRUCTION_PREFIXES: &[&str] = &[
    "use ", "replace ", "map ", "derive ", "set ", "todo", "calculate ", "compute ", "lookup ",
    "look up ", "join ", "insert ", "fill ",
];

/// Run both passes over `sql`
pub fn validate(sql: &str, schema: &TenantSchema, analysis: &QueryAnalysis, mappings: &MappingSet) -> ValidationResult {
    if sql.trim().is_empty() {
        return unreadable("empty SQL".to_string());
    }
    let stmt = match Statement::parse(sql) {
        Ok(stmt) => stmt,
        Err(e) => return unreadable(e.to_string()),
    };
    validate_schema(&stmt, schema).merge(validate_derived(&stmt, analysis, mappings))
}

fn unreadable(message: String) -> ValidationResult {
    ValidationResult::new(vec![ValidationIssue::Unreadable { message }], vec![], vec![])
}

/// Every FROM/JOIN table and every column reference must exist in the tenant schema
pub fn validate_schema(stmt: &Statement, schema: &TenantSchema) -> ValidationResult {
    let mut errors = Vec::new();
    let mut tables: Vec<String> = Vec::new();
    let mut columns: Vec<String> = Vec::new();
    let available: Vec<String> = schema.table_names().iter().map(|s| s.to_string()).collect();

    for table in stmt.tables() {
        if tables.iter().any(|t| t.eq_ignore_ascii_case(&table.name)) {
            continue;
        }
        tables.push(table.name.clone());
        if !schema.has_table(&table.name) {
            errors.push(ValidationIssue::MissingTable {
                table: table.name.clone(),
                available: available.clone(),
            });
        }
    }

    for column in stmt.qualified_columns() {
        push_unique(&mut columns, &column.column);
        let Some(qualifier) = column.qualifier.as_deref() else {
            continue;
        };
        if stmt.is_virtual_qualifier(qualifier) {
            continue;
        }
        let Some(table_ref) = stmt.resolve_qualifier(qualifier) else {
            errors.push(ValidationIssue::UnknownQualifier {
                qualifier: qualifier.to_string(),
                column: column.column.clone(),
            });
            continue;
        };
        // already reported as a missing table
        let Some(table) = schema.table(&table_ref.name) else {
            continue;
        };
        if !table.has_column(&column.column) {
            errors.push(missing_column(&table.name, &column.column, &table.column_names()));
        }
    }

    // Bare names can only be pinned to a table when exactly one real table is in scope
    let single_scope = stmt.tables().len() == 1
        && stmt.ctes().is_empty()
        && stmt.derived_aliases().is_empty()
        && !stmt.has_subquery();
    let aliases = stmt.output_aliases();
    for column in stmt.bare_columns() {
        push_unique(&mut columns, &column.column);
        if !single_scope || aliases.iter().any(|a| a.eq_ignore_ascii_case(&column.column)) {
            continue;
        }
        if let Some(table) = schema.table(&stmt.tables()[0].name) {
            if !table.has_column(&column.column)
                && !errors.iter().any(|e| matches!(e, ValidationIssue::MissingColumn { column: c, .. } if c == &column.column))
            {
                errors.push(missing_column(&table.name, &column.column, &table.column_names()));
            }
        }
    }

    let result = ValidationResult::new(errors, tables, columns);
    if !result.valid {
        tracing::warn!(
            tenant = %schema.tenant_id,
            errors = result.errors.len(),
            "Schema grounding failed"
        );
    }
    result
}

/// Every derived field the query touches must appear through its registered
/// expression, token for token
pub fn validate_derived(stmt: &Statement, analysis: &QueryAnalysis, mappings: &MappingSet) -> ValidationResult {
    let mut errors = Vec::new();
    let output = stmt.normalized();
    let items = stmt.select_items();

    for field in &analysis.derived_fields {
        let Some(derived) = mappings.derived(field) else {
            continue;
        };
        let applied = match normalized_tokens(&derived.expression) {
            Ok(expected) => contains_sequence(&output, &expected),
            Err(_) => false,
        };
        if !applied {
            errors.push(ValidationIssue::DerivedNotApplied {
                field: derived.canonical_field.clone(),
                expression: derived.expression.clone(),
            });
        }

        for item in &items {
            let aliased_as_field = stmt
                .item_alias(item)
                .map(|a| a.eq_ignore_ascii_case(field))
                .unwrap_or(false);
            if !aliased_as_field {
                continue;
            }
            if let Some((_, column)) = stmt.item_column(item) {
                errors.push(ValidationIssue::DerivedAsBareColumn {
                    field: derived.canonical_field.clone(),
                    column,
                });
            }
        }
    }

    // 'Use the CASE expression' AS status
    for item in &items {
        let body = stmt.item_body(item);
        let (Some(alias), [only]) = (stmt.item_alias(item), body.as_slice()) else {
            continue;
        };
        let token = &stmt.tokens()[*only];
        if token.kind == TokenKind::String && is_instruction_text(&token.text) {
            errors.push(ValidationIssue::InstructionLiteral {
                alias,
                text: literal_body(&token.text).to_string(),
            });
        }
    }

    ValidationResult::new(errors, Vec::new(), Vec::new())
}

/// Contents of a quoted string literal
pub(crate) fn literal_body(literal: &str) -> &str {
    let start = literal.find('\'').map(|i| i + 1).unwrap_or(0);
    let end = literal.rfind('\'').filter(|&e| e >= start).unwrap_or(literal.len());
    &literal[start..end]
}

/// Whether a string literal reads as a note to the reader rather than data
pub fn is_instruction_text(literal: &str) -> bool {
    let body = literal_body(literal).trim_start().to_lowercase();
    body.split_whitespace().count() >= 3 && INSTRUCTION_PREFIXES.iter().any(|p| body.starts_with(p))
}

fn missing_column(table: &str, column: &str, candidates: &[&str]) -> ValidationIssue {
    ValidationIssue::MissingColumn {
        table: table.to_string(),
        column: column.to_string(),
        suggestions: suggest(column, candidates),
    }
}

/// Up to three similarly spelled names, closest first
pub fn suggest(name: &str, candidates: &[&str]) -> Vec<String> {
    let lower = name.to_lowercase();
    let mut scored: Vec<(f64, &str)> = candidates
        .iter()
        .filter_map(|c| {
            let candidate = c.to_lowercase();
            let distance = strsim::levenshtein(&lower, &candidate);
            let similarity = strsim::jaro_winkler(&lower, &candidate);
            let contains = candidate.contains(&lower) || lower.contains(&candidate);
            (distance <= 2 || similarity >= 0.88 || contains).then_some((similarity, *c))
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, c)| c.to_string())
        .collect()
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        list.push(name.to_string());
    }
}
