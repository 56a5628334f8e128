//! Generation Translator: prompt construction and response handling for the
//! complex path

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use tenantql_model::{JoinStrategy, MappingKind, MappingSet, QueryAnalysis, TenantSchema, ValidationIssue};
use tenantql_sql::{Statement, TokenKind};

use crate::backend::{extract_fenced, extract_json, GenerationClient, GenerationError};
use crate::samples::TableSamples;
use crate::validator::{is_instruction_text, literal_body};

const FENCED_CONFIDENCE: f64 = 0.6;
const BARE_CONFIDENCE: f64 = 0.5;
const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Everything the prompt is built from
#[derive(Debug, Clone, Copy)]
pub struct TranslationContext<'a> {
    pub query: &'a str,
    pub schema: &'a TenantSchema,
    pub mappings: &'a MappingSet,
    pub analysis: &'a QueryAnalysis,
    pub join_strategy: &'a JoinStrategy,
    pub samples: &'a TableSamples,
}

/// One candidate translation, not yet validated
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub sql: String,
    pub confidence: f64,
    pub reasoning: String,
    pub warnings: Vec<String>,
}

#[derive(Deserialize)]
struct Reply {
    sql: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

#[derive(Clone)]
pub struct GenerationTranslator {
    client: GenerationClient,
}

impl GenerationTranslator {
    pub fn new(client: GenerationClient) -> Self {
        Self { client }
    }

    /// One backend call. An empty or unparseable reply fails the attempt.
    pub async fn translate(&self, prompt: &str) -> Result<Draft, GenerationError> {
        tracing::debug!(prompt_len = prompt.len(), "Requesting translation");
        let text = self.client.generate_once(prompt).await?;
        let mut draft = parse_response(&text).map_err(GenerationError::Unparseable)?;
        let (sql, warnings) = clean_instruction_literals(&draft.sql);
        draft.sql = sql;
        draft.warnings.extend(warnings);
        Ok(draft)
    }
}

/// First-attempt prompt
pub fn prompt(ctx: &TranslationContext<'_>) -> String {
    let mut p = String::new();
    p.push_str(
        "You translate SQL written against a canonical schema into SQL for one tenant's database.\n\n",
    );

    let _ = writeln!(p, "=== CANONICAL QUERY ===\n{}\n", ctx.query.trim());

    p.push_str("=== TENANT TABLES ===\n");
    for table in &ctx.schema.tables {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.data_type))
            .collect();
        let _ = writeln!(p, "{}({})", table.name, columns.join(", "));
    }
    p.push('\n');

    let mut strategy_tables = vec![ctx.join_strategy.primary_table.as_str()];
    strategy_tables.extend(ctx.join_strategy.joins.iter().map(|j| j.table.as_str()));
    p.push_str(&ctx.samples.render(&strategy_tables));

    let canonical_tables = &ctx.analysis.tables_referenced;
    p.push_str("=== TABLE MAPPINGS ===\n");
    for m in ctx.mappings.table_mappings.iter().filter(|m| references(canonical_tables, &m.canonical_table)) {
        let _ = writeln!(p, "{} -> {} (confidence {:.2})", m.canonical_table, m.tenant_table, m.confidence);
    }
    p.push('\n');

    p.push_str("=== FIELD MAPPINGS ===\n");
    for f in ctx
        .mappings
        .field_mappings
        .iter()
        .filter(|f| f.kind == MappingKind::Direct && references(canonical_tables, &f.canonical_table))
    {
        let _ = writeln!(
            p,
            "{} -> {}.{} (confidence {:.2})",
            f.canonical_field,
            f.target_table,
            f.target_column.as_deref().unwrap_or_default(),
            f.confidence
        );
    }
    p.push('\n');

    let derived: Vec<_> = canonical_tables
        .iter()
        .flat_map(|t| ctx.mappings.derived_for_table(t))
        .filter(|d| {
            ctx.analysis.derived_fields.iter().any(|f| f.eq_ignore_ascii_case(&d.canonical_field))
                || ctx.analysis.references_column(&d.canonical_field)
        })
        .collect();
    if !derived.is_empty() {
        p.push_str("=== DERIVED FIELDS - COPY EXACTLY ===\n");
        p.push_str(
            "These fields have no column. Wherever the canonical query uses one, write its expression \
             exactly as given, character for character, and alias it with the field name in the select list.\n",
        );
        for d in derived {
            let _ = writeln!(p, "{}:\n    {}", d.canonical_field, d.expression);
        }
        p.push('\n');
    }

    let unmapped: Vec<_> = ctx
        .mappings
        .unmapped
        .iter()
        .filter(|u| references(canonical_tables, &u.canonical_table))
        .collect();
    if !unmapped.is_empty() {
        p.push_str("=== UNMAPPED FIELDS - OMIT ===\n");
        for u in unmapped {
            let _ = writeln!(p, "{} ({})", u.canonical_field, u.reason);
        }
        p.push('\n');
    }

    let _ = writeln!(
        p,
        "=== JOIN STRATEGY ===\nconfidence {:.2}\nFROM {}",
        ctx.join_strategy.confidence,
        ctx.join_strategy.to_sql()
    );
    if !ctx.join_strategy.unreachable.is_empty() {
        let _ = writeln!(p, "no join path found to: {}", ctx.join_strategy.unreachable.join(", "));
    }
    p.push('\n');

    p.push_str(
        "=== RULES ===\n\
         1. Reference only the tenant tables and columns listed above.\n\
         2. Reuse every derived expression verbatim wherever its field appears.\n\
         3. Keep the canonical output column names by aliasing translated columns.\n\
         4. Emit executable SQL only. Never put explanations or instructions inside string literals.\n\n",
    );
    p.push_str(
        "=== RESPONSE FORMAT ===\n\
         Reply with one JSON object and nothing else:\n\
         {\"sql\": \"...\", \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}\n",
    );
    p
}

/// Stricter prompt after a failed validation: the original context plus an
/// itemized list of what was wrong and what exists instead
pub fn retry_prompt(ctx: &TranslationContext<'_>, previous_sql: &str, issues: &[ValidationIssue], failure: Option<&str>) -> String {
    let mut p = prompt(ctx);
    p.push_str("\n=== PREVIOUS ATTEMPT FAILED VALIDATION ===\n");
    if previous_sql.trim().is_empty() {
        p.push_str("(no usable SQL was returned)\n");
    } else {
        let _ = writeln!(p, "{}", previous_sql.trim());
    }
    p.push_str("\nProblems:\n");
    let mut n = 0;
    if let Some(failure) = failure {
        n += 1;
        let _ = writeln!(p, "{}. {}", n, failure);
    }
    for issue in issues {
        n += 1;
        let _ = writeln!(p, "{}. {}", n, issue);
    }

    let mut shown: HashSet<String> = HashSet::new();
    let mut listing = String::new();
    for issue in issues {
        let tables: Vec<&str> = match issue {
            ValidationIssue::MissingTable { .. } | ValidationIssue::UnknownQualifier { .. } => ctx.schema.table_names(),
            ValidationIssue::MissingColumn { table, .. } => vec![table.as_str()],
            _ => Vec::new(),
        };
        for name in tables {
            let Some(table) = ctx.schema.table(name) else {
                continue;
            };
            if shown.insert(table.name.to_lowercase()) {
                let _ = writeln!(listing, "{} with columns {}", table.name, table.column_names().join(", "));
            }
        }
    }
    if !listing.is_empty() {
        p.push_str("\nAvailable tables:\n");
        p.push_str(&listing);
    }
    p.push_str("\nFix every problem above and answer in the same JSON format.\n");
    p
}

fn references(tables: &[String], name: &str) -> bool {
    tables.iter().any(|t| t.eq_ignore_ascii_case(name))
}

/// Accept `{sql, confidence, reasoning}` (bare or fenced), a fenced SQL block,
/// or a reply that is nothing but a SELECT
pub fn parse_response(text: &str) -> Result<Draft, String> {
    if let Some(json) = extract_json(text) {
        if let Ok(reply) = serde_json::from_str::<Reply>(json) {
            let sql = tidy(&reply.sql);
            if sql.is_empty() {
                return Err("response JSON has an empty sql field".to_string());
            }
            return Ok(Draft {
                sql,
                confidence: reply.confidence.unwrap_or(DEFAULT_CONFIDENCE).clamp(0.0, 1.0),
                reasoning: reply.reasoning,
                warnings: Vec::new(),
            });
        }
    }

    if let Some(body) = extract_fenced(text, "sql") {
        let sql = tidy(body);
        if !sql.is_empty() {
            return Ok(Draft {
                sql,
                confidence: FENCED_CONFIDENCE,
                reasoning: String::new(),
                warnings: vec!["response was not JSON; used fenced SQL".to_string()],
            });
        }
    }

    let sql = tidy(text);
    let head = sql.split_whitespace().next().unwrap_or_default();
    if head.eq_ignore_ascii_case("SELECT") || head.eq_ignore_ascii_case("WITH") {
        return Ok(Draft {
            sql,
            confidence: BARE_CONFIDENCE,
            reasoning: String::new(),
            warnings: vec!["response was not JSON; used raw SQL".to_string()],
        });
    }
    Err("no SQL found in response".to_string())
}

fn tidy(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

/// `'Use the awards table' AS status` becomes `NULL AS status`
pub fn clean_instruction_literals(sql: &str) -> (String, Vec<String>) {
    let Ok(stmt) = Statement::parse(sql) else {
        return (sql.to_string(), Vec::new());
    };
    let mut replace: HashMap<usize, String> = HashMap::new();
    let mut warnings = Vec::new();
    for item in stmt.select_items() {
        let body = stmt.item_body(&item);
        let (Some(alias), [only]) = (stmt.item_alias(&item), body.as_slice()) else {
            continue;
        };
        let token = &stmt.tokens()[*only];
        if token.kind == TokenKind::String && is_instruction_text(&token.text) {
            warnings.push(format!(
                "replaced instruction text for {} with NULL: '{}'",
                alias,
                literal_body(&token.text)
            ));
            replace.insert(*only, "NULL".to_string());
        }
    }
    if replace.is_empty() {
        return (sql.to_string(), warnings);
    }
    let cleaned = stmt
        .tokens()
        .iter()
        .enumerate()
        .map(|(i, t)| replace.get(&i).map(String::as_str).unwrap_or(&t.text))
        .collect();
    (cleaned, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{awards_mappings, awards_schema, STATUS_CASE};
    use tenantql_model::Complexity;

    fn analysis() -> QueryAnalysis {
        QueryAnalysis {
            complexity: Complexity::Complex,
            tables_referenced: vec!["contracts".to_string()],
            columns_referenced: vec!["contract_id".to_string(), "status".to_string()],
            has_join: false,
            has_aggregation: false,
            has_derived_field: true,
            has_subquery: false,
            derived_fields: vec!["status".to_string()],
        }
    }

    #[test]
    fn test_prompt_carries_context() {
        let (schema, mappings, analysis) = (awards_schema(), awards_mappings(), analysis());
        let strategy = JoinStrategy::single("awards");
        let ctx = TranslationContext {
            query: "SELECT contract_id, status FROM contracts WHERE status='active'",
            schema: &schema,
            mappings: &mappings,
            analysis: &analysis,
            join_strategy: &strategy,
            samples: &TableSamples::default(),
        };
        let p = prompt(&ctx);
        assert!(p.contains("=== CANONICAL QUERY ===\nSELECT contract_id, status FROM contracts"));
        assert!(p.contains("awards(generated_unique_award_id VARCHAR, description VARCHAR"));
        assert!(p.contains("contracts -> awards (confidence 0.95)"));
        assert!(p.contains("contract_id -> awards.generated_unique_award_id"));
        assert!(p.contains(&format!("status:\n    {}", STATUS_CASE)));
        assert!(p.contains("value_currency (no currency column)"));
        assert!(!p.contains("role (no role column)"));
        assert!(p.contains("=== JOIN STRATEGY ===\nconfidence 1.00\nFROM awards"));
    }

    #[test]
    fn test_prompt_shows_samples_for_planned_tables_only() {
        let (schema, mappings, analysis) = (awards_schema(), awards_mappings(), analysis());
        let strategy = JoinStrategy::single("awards");
        let rows = |column: &str, value: &str| crate::executor::QueryResult {
            columns: vec![column.to_string()],
            rows: vec![vec![serde_json::json!(value)]],
            row_count: 1,
        };
        let mut samples = TableSamples::default();
        samples.insert("awards", rows("description", "Bridge repair"));
        samples.insert("recipients", rows("legal_name", "Acme Corp"));
        let ctx = TranslationContext {
            query: "SELECT contract_id, status FROM contracts",
            schema: &schema,
            mappings: &mappings,
            analysis: &analysis,
            join_strategy: &strategy,
            samples: &samples,
        };
        let p = prompt(&ctx);
        assert!(p.contains("=== SAMPLE ROWS ===\nawards (description):\n  Bridge repair\n"));
        assert!(!p.contains("Acme Corp"));
    }

    #[test]
    fn test_retry_prompt_lists_problems_and_tables() {
        let (schema, mappings, analysis) = (awards_schema(), awards_mappings(), analysis());
        let strategy = JoinStrategy::single("awards");
        let ctx = TranslationContext {
            query: "SELECT contract_id FROM contracts",
            schema: &schema,
            mappings: &mappings,
            analysis: &analysis,
            join_strategy: &strategy,
            samples: &TableSamples::default(),
        };
        let issues = vec![ValidationIssue::MissingTable {
            table: "award_history".to_string(),
            available: vec!["awards".to_string(), "recipients".to_string()],
        }];
        let p = retry_prompt(&ctx, "SELECT * FROM award_history", &issues, None);
        assert!(p.contains("=== PREVIOUS ATTEMPT FAILED VALIDATION ===\nSELECT * FROM award_history"));
        assert!(p.contains("1. table award_history does not exist; available: awards, recipients"));
        assert!(p.contains("recipients with columns id, legal_name, email"));
    }

    #[test]
    fn test_parse_json_reply() {
        let reply = "```json\n{\"sql\": \"SELECT 1 FROM awards;\", \"confidence\": 1.4, \"reasoning\": \"ok\"}\n```";
        let draft = parse_response(reply).unwrap();
        assert_eq!(draft.sql, "SELECT 1 FROM awards");
        assert_eq!(draft.confidence, 1.0);
        assert_eq!(draft.reasoning, "ok");
    }

    #[test]
    fn test_parse_fenced_and_bare_sql() {
        let draft = parse_response("Here:\n```sql\nSELECT a FROM awards\n```").unwrap();
        assert_eq!(draft.sql, "SELECT a FROM awards");
        assert_eq!(draft.confidence, FENCED_CONFIDENCE);

        let draft = parse_response("  select a from awards ").unwrap();
        assert_eq!(draft.confidence, BARE_CONFIDENCE);

        assert!(parse_response("").is_err());
        assert!(parse_response("I cannot help with that").is_err());
        assert!(parse_response("{\"sql\": \"\"}").is_err());
    }

    #[test]
    fn test_instruction_literals_become_null() {
        let (sql, warnings) = clean_instruction_literals(
            "SELECT id, 'Use the recipient table to find this' AS buyer_party_id, 'active' AS status FROM awards",
        );
        assert_eq!(sql, "SELECT id, NULL AS buyer_party_id, 'active' AS status FROM awards");
        assert_eq!(warnings.len(), 1);
    }
}
