//! Direct Rewriter: token substitution for simple queries
//!
//! Only identifier tokens that the structural scan placed in a table or
//! column position are touched, so string literals, comments, aliases and
//! substrings of longer names (`id` inside `contract_id`) survive unchanged.

use std::collections::{HashMap, HashSet};
use tenantql_model::{MappingKind, MappingSet, QueryAnalysis};
use tenantql_sql::{SelectItem, SqlError, Statement, Token, TokenKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("Query is not eligible for direct rewrite")]
    NotSimple,

    #[error("No table mapping for canonical table '{0}'")]
    NoTableMapping(String),

    #[error(transparent)]
    Sql(#[from] SqlError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rewrite {
    pub sql: String,
    /// Minimum confidence among the mappings used
    pub confidence: f64,
    pub warnings: Vec<String>,
}

pub fn rewrite(stmt: &Statement, analysis: &QueryAnalysis, mappings: &MappingSet) -> Result<Rewrite, RewriteError> {
    if !analysis.is_simple() {
        return Err(RewriteError::NotSimple);
    }
    let canonical_table = analysis
        .tables_referenced
        .first()
        .ok_or(RewriteError::NotSimple)?;
    let table_mapping = mappings
        .table(canonical_table)
        .ok_or_else(|| RewriteError::NoTableMapping(canonical_table.clone()))?;

    let tokens = stmt.tokens();
    let mut replacements: HashMap<usize, String> = HashMap::new();
    let mut confidence = table_mapping.confidence;
    let mut warnings = Vec::new();

    for table in stmt.tables() {
        if table.name.eq_ignore_ascii_case(canonical_table) {
            replacements.insert(table.token, requote(&tokens[table.token], &table_mapping.tenant_table));
        }
    }

    let aliases = stmt.output_aliases();
    let mut unmapped: Vec<String> = Vec::new();
    let mut foreign: Vec<String> = Vec::new();

    for column in stmt.bare_columns().into_iter().chain(stmt.qualified_columns()) {
        if let Some(q_token) = column.qualifier_token {
            let names_table = column
                .qualifier
                .as_deref()
                .map(|q| q.eq_ignore_ascii_case(canonical_table))
                .unwrap_or(false);
            if names_table {
                replacements.insert(q_token, requote(&tokens[q_token], &table_mapping.tenant_table));
            }
        }

        // ORDER BY names the output column when a select item carries that alias
        let sorts_by_alias = column.qualifier.is_none()
            && stmt.in_order_by(column.token)
            && aliases.iter().any(|a| a.eq_ignore_ascii_case(&column.column));
        if sorts_by_alias {
            continue;
        }

        match mappings.field(&column.column) {
            Some(field) if field.kind == MappingKind::Direct && field.canonical_table.eq_ignore_ascii_case(canonical_table) => {
                if let Some(target) = field.target_column.as_deref() {
                    replacements.insert(column.token, requote(&tokens[column.token], target));
                    confidence = confidence.min(field.confidence);
                }
            }
            Some(_) => {}
            None if aliases.iter().any(|a| a.eq_ignore_ascii_case(&column.column)) => {}
            None if mappings.unmapped_field(&column.column).is_some() => push_unique(&mut unmapped, &column.column),
            None => push_unique(&mut foreign, &column.column),
        }
    }

    let items = stmt.select_items();
    let droppable: Vec<bool> = items
        .iter()
        .map(|item| {
            stmt.item_column(item)
                .map(|(_, col)| unmapped.iter().any(|u| u.eq_ignore_ascii_case(&col)))
                .unwrap_or(false)
        })
        .collect();

    let mut removed: HashSet<usize> = HashSet::new();
    let mut dropped: Vec<String> = Vec::new();
    if droppable.iter().all(|d| *d) && !items.is_empty() {
        warnings.push("every selected field is unmapped; select list left unchanged".to_string());
    } else {
        for (i, item) in items.iter().enumerate() {
            if !droppable[i] {
                continue;
            }
            removed.extend(drop_range(&items, &droppable, i));
            if let Some((_, col)) = stmt.item_column(item) {
                push_unique(&mut dropped, &col);
            }
        }
    }

    for field in &unmapped {
        let reason = mappings
            .unmapped_field(field)
            .map(|u| u.reason.as_str())
            .unwrap_or("no mapping");
        if dropped.iter().any(|d| d.eq_ignore_ascii_case(field)) {
            warnings.push(format!("unmapped field {} omitted from select list ({})", field, reason));
        } else {
            warnings.push(format!("unmapped field {} left unchanged ({})", field, reason));
        }
    }
    for name in &foreign {
        warnings.push(format!("{} is not a mapped canonical field; left unchanged", name));
    }

    let sql = render(tokens, &replacements, &removed);
    tracing::debug!(
        tenant = %mappings.tenant_id,
        substitutions = replacements.len(),
        dropped = removed.len(),
        "Rewrote query directly"
    );
    Ok(Rewrite {
        sql,
        confidence,
        warnings,
    })
}

/// Inverse substitution: tenant names back to canonical ones
pub fn reverse(sql: &str, mappings: &MappingSet) -> Result<String, SqlError> {
    let stmt = Statement::parse(sql)?;
    let tokens = stmt.tokens();
    let mut replacements: HashMap<usize, String> = HashMap::new();

    let canonical_table = |tenant: &str| {
        mappings
            .table_mappings
            .iter()
            .find(|m| m.tenant_table.eq_ignore_ascii_case(tenant))
            .map(|m| m.canonical_table.clone())
    };

    for table in stmt.tables() {
        if let Some(name) = canonical_table(&table.name) {
            replacements.insert(table.token, requote(&tokens[table.token], &name));
        }
    }
    for column in stmt.bare_columns().into_iter().chain(stmt.qualified_columns()) {
        if let (Some(q_token), Some(q)) = (column.qualifier_token, column.qualifier.as_deref()) {
            if let Some(name) = canonical_table(q) {
                replacements.insert(q_token, requote(&tokens[q_token], &name));
            }
        }
        let field = mappings.field_mappings.iter().find(|f| {
            f.kind == MappingKind::Direct
                && f.target_column
                    .as_deref()
                    .map(|c| c.eq_ignore_ascii_case(&column.column))
                    .unwrap_or(false)
        });
        if let Some(field) = field {
            replacements.insert(column.token, requote(&tokens[column.token], &field.canonical_field));
        }
    }
    Ok(render(tokens, &replacements, &HashSet::new()))
}

/// Token indices to remove when dropping item `i`: its leading comma if an
/// earlier item survives, otherwise everything up to the next item
fn drop_range(items: &[SelectItem], droppable: &[bool], i: usize) -> std::ops::Range<usize> {
    let item = &items[i];
    let kept_before = droppable[..i].iter().any(|d| !*d);
    match (kept_before, item.comma_before, items.get(i + 1)) {
        (true, Some(comma), _) => comma..item.end,
        (_, _, Some(next)) => item.start..next.start,
        _ => item.start..item.end,
    }
}

fn requote(original: &Token, name: &str) -> String {
    match original.kind {
        TokenKind::QuotedIdent => format!("\"{}\"", name.replace('"', "\"\"")),
        _ => name.to_string(),
    }
}

fn render(tokens: &[Token], replacements: &HashMap<usize, String>, removed: &HashSet<usize>) -> String {
    let mut out = String::new();
    for (i, token) in tokens.iter().enumerate() {
        if removed.contains(&i) {
            continue;
        }
        match replacements.get(&i) {
            Some(text) => out.push_str(text),
            None => out.push_str(&token.text),
        }
    }
    out
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n.eq_ignore_ascii_case(name)) {
        list.push(name.to_string());
    }
}
