//! Mapping Discoverer
//!
//! Asks the generation backend, once per canonical table, where each
//! canonical field lives in the tenant schema. Every proposal is grounded
//! against the schema before it is accepted: names must exist, derived
//! expressions may only read real columns, and anything below the confidence
//! floor is recorded as unmapped instead.

use serde::Deserialize;
use std::fmt::Write as _;
use tenantql_model::{
    CanonicalSchema, CanonicalTable, DerivedMapping, FieldMapping, MappingKind, MappingSet, TableMapping,
    TenantSchema, UnmappedField,
};
use tenantql_sql::Statement;
use thiserror::Error;

use crate::backend::{extract_json, GenerationClient, GenerationError};
use crate::samples::TableSamples;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Mapping discovery unavailable for canonical table '{table}': {source}")]
    Unavailable {
        table: String,
        #[source]
        source: GenerationError,
    },
}

#[derive(Debug, Deserialize)]
struct TableProposal {
    #[serde(default)]
    table: Option<TableTarget>,
    #[serde(default)]
    fields: Vec<FieldProposal>,
}

#[derive(Debug, Deserialize)]
struct TableTarget {
    target_table: Option<String>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ProposalKind {
    Direct,
    Derived,
    Constant,
    #[serde(other)]
    None,
}

#[derive(Debug, Deserialize)]
struct FieldProposal {
    canonical_field: String,
    kind: ProposalKind,
    #[serde(default)]
    target_table: Option<String>,
    #[serde(default)]
    target_column: Option<String>,
    #[serde(default)]
    expression: Option<String>,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Accepted pieces of one canonical table's mapping
#[derive(Default)]
struct Grounded {
    table: Option<TableMapping>,
    fields: Vec<FieldMapping>,
    derived: Vec<DerivedMapping>,
    unmapped: Vec<UnmappedField>,
}

#[derive(Clone)]
pub struct MappingDiscoverer {
    client: GenerationClient,
    floor: f64,
}

impl MappingDiscoverer {
    pub fn new(client: GenerationClient, confidence_floor: f64) -> Self {
        Self {
            client,
            floor: confidence_floor,
        }
    }

    /// Build a complete mapping set, or fail without producing anything
    pub async fn discover(
        &self,
        schema: &TenantSchema,
        canonical: &CanonicalSchema,
        samples: &TableSamples,
    ) -> Result<MappingSet, DiscoveryError> {
        let mut set = MappingSet::new(schema.tenant_id.clone());
        set.canonical_version = canonical.version.clone();

        for table in &canonical.tables {
            let prompt = discovery_prompt(schema, table, samples);
            let proposal = self
                .client
                .generate_parsed(&prompt, parse_proposal)
                .await
                .map_err(|source| DiscoveryError::Unavailable {
                    table: table.name.clone(),
                    source,
                })?;

            let grounded = ground(schema, table, proposal, self.floor);
            tracing::info!(
                tenant = %schema.tenant_id,
                canonical_table = %table.name,
                tenant_table = grounded.table.as_ref().map(|t| t.tenant_table.as_str()).unwrap_or("-"),
                mapped = grounded.fields.len(),
                unmapped = grounded.unmapped.len(),
                "Discovered mappings"
            );
            set.table_mappings.extend(grounded.table);
            set.field_mappings.extend(grounded.fields);
            set.derived_mappings.extend(grounded.derived);
            set.unmapped.extend(grounded.unmapped);
        }
        Ok(set)
    }
}

pub fn discovery_prompt(schema: &TenantSchema, table: &CanonicalTable, samples: &TableSamples) -> String {
    let mut p = String::new();
    p.push_str("Map a canonical table onto one tenant's database schema.\n\n");

    let _ = writeln!(p, "=== CANONICAL TABLE: {} ===", table.name);
    if let Some(description) = &table.description {
        let _ = writeln!(p, "{}", description);
    }
    for field in &table.fields {
        let _ = write!(p, "- {} {}", field.name, field.field_type.as_sql());
        if field.required {
            p.push_str(" required");
        }
        if let Some(values) = &field.allowed_values {
            let _ = write!(p, " one of [{}]", values.join(", "));
        }
        if let Some(description) = &field.description {
            let _ = write!(p, ": {}", description);
        }
        p.push('\n');
    }

    p.push_str("\n=== TENANT SCHEMA ===\n");
    for t in &schema.tables {
        let _ = write!(p, "{}", t.name);
        if let Some(description) = &t.description {
            let _ = write!(p, " -- {}", description);
        }
        p.push('\n');
        for c in &t.columns {
            let _ = write!(p, "  {} {}", c.name, c.data_type);
            if c.primary_key {
                p.push_str(" PRIMARY KEY");
            }
            if let Some(description) = &c.description {
                let _ = write!(p, " -- {}", description);
            }
            p.push('\n');
        }
    }
    for r in &schema.relationships {
        let _ = writeln!(p, "{}.{} references {}.{}", r.table, r.column, r.target_table, r.target_column);
    }
    let sampled = samples.render(&schema.table_names());
    if !sampled.is_empty() {
        p.push('\n');
        p.push_str(&sampled);
    }

    p.push_str(
        "\n=== INSTRUCTIONS ===\n\
         Pick the tenant table that holds this entity. For every canonical field choose one kind:\n\
         - direct: a single tenant column holds the value\n\
         - derived: no single column fits; give a SQL expression over columns of the tenant table \
           (for example a CASE over date columns), with no subqueries\n\
         - constant: the tenant stores one fixed value for everyone\n\
         - none: the tenant does not have this information\n\
         Use only tables and columns listed above. Give each choice a confidence between 0 and 1.\n\n\
         === RESPONSE FORMAT ===\n\
         {\"table\": {\"target_table\": \"...\", \"confidence\": 0.9},\n \
          \"fields\": [{\"canonical_field\": \"...\", \"kind\": \"direct|derived|constant|none\", \
         \"target_table\": \"...\", \"target_column\": \"...\", \"expression\": \"...\", \"value\": \"...\", \
         \"confidence\": 0.9, \"reasoning\": \"...\"}]}\n",
    );
    p
}

fn parse_proposal(text: &str) -> Result<TableProposal, String> {
    let json = extract_json(text).ok_or_else(|| "no JSON object in response".to_string())?;
    serde_json::from_str(json).map_err(|e| format!("invalid mapping JSON: {}", e))
}

fn ground(schema: &TenantSchema, canonical: &CanonicalTable, proposal: TableProposal, floor: f64) -> Grounded {
    let mut out = Grounded::default();
    let unmapped = |field: &str, reason: String| UnmappedField {
        canonical_table: canonical.name.clone(),
        canonical_field: field.to_string(),
        reason,
    };

    let table_target = proposal.table.as_ref().and_then(|t| {
        let name = t.target_table.as_deref()?;
        Some((schema.table(name), name, t.confidence.clamp(0.0, 1.0)))
    });
    let tenant_table = match table_target {
        Some((Some(table), _, confidence)) if confidence >= floor => {
            out.table = Some(TableMapping {
                canonical_table: canonical.name.clone(),
                tenant_table: table.name.clone(),
                confidence,
            });
            table
        }
        other => {
            let reason = match other {
                Some((Some(_), _, confidence)) => format!("table confidence {:.2} below floor {:.2}", confidence, floor),
                Some((None, name, _)) => format!("proposed table {} does not exist", name),
                None => "no tenant table holds this entity".to_string(),
            };
            tracing::warn!(canonical_table = %canonical.name, %reason, "Canonical table left unmapped");
            out.unmapped = canonical
                .fields
                .iter()
                .map(|f| unmapped(&f.name, reason.clone()))
                .collect();
            return out;
        }
    };

    for field in &canonical.fields {
        let Some(p) = proposal
            .fields
            .iter()
            .find(|p| p.canonical_field.eq_ignore_ascii_case(&field.name))
        else {
            out.unmapped.push(unmapped(&field.name, "no proposal".to_string()));
            continue;
        };
        // out-of-range provider values are pinned to [0, 1]
        let confidence = p.confidence.clamp(0.0, 1.0);

        if p.kind != ProposalKind::None && confidence < floor {
            out.unmapped.push(unmapped(
                &field.name,
                format!("confidence {:.2} below floor {:.2}", confidence, floor),
            ));
            continue;
        }

        let target = match p.target_table.as_deref() {
            Some(name) => schema.table(name),
            None => Some(tenant_table),
        };
        let Some(target) = target else {
            out.unmapped.push(unmapped(
                &field.name,
                format!("proposed table {} does not exist", p.target_table.as_deref().unwrap_or_default()),
            ));
            continue;
        };

        let accepted = match p.kind {
            ProposalKind::Direct => match p.target_column.as_deref().and_then(|c| target.column(c)) {
                Some(column) => {
                    out.fields.push(FieldMapping {
                        canonical_table: canonical.name.clone(),
                        canonical_field: field.name.clone(),
                        target_table: target.name.clone(),
                        target_column: Some(column.name.clone()),
                        confidence,
                        kind: MappingKind::Direct,
                    });
                    Ok(())
                }
                None => Err(format!(
                    "proposed column {}.{} does not exist",
                    target.name,
                    p.target_column.as_deref().unwrap_or_default()
                )),
            },
            ProposalKind::Derived => match p.expression.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                Some(expression) => ground_expression(schema, &target.name, expression).map(|()| {
                    push_derived(&mut out, canonical, &field.name, &target.name, expression.to_string(), confidence)
                }),
                None => Err("derived proposal without expression".to_string()),
            },
            ProposalKind::Constant => match p.value.as_ref().and_then(constant_literal) {
                Some(literal) => {
                    push_derived(&mut out, canonical, &field.name, &target.name, literal, confidence);
                    Ok(())
                }
                None => Err("constant proposal without a scalar value".to_string()),
            },
            ProposalKind::None => Err(p
                .reasoning
                .clone()
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| "no matching tenant data".to_string())),
        };

        if let Err(reason) = accepted {
            tracing::warn!(
                canonical_field = %field.name,
                %reason,
                "Dropped mapping proposal"
            );
            out.unmapped.push(unmapped(&field.name, reason));
        }
    }
    out
}

fn push_derived(out: &mut Grounded, canonical: &CanonicalTable, field: &str, table: &str, expression: String, confidence: f64) {
    out.fields.push(FieldMapping {
        canonical_table: canonical.name.clone(),
        canonical_field: field.to_string(),
        target_table: table.to_string(),
        target_column: None,
        confidence,
        kind: MappingKind::Derived,
    });
    out.derived.push(DerivedMapping {
        canonical_field: field.to_string(),
        expression,
        confidence,
        source_table: Some(table.to_string()),
    });
}

/// A derived expression must be a scalar over existing columns: no FROM, no
/// subquery, and every column it names must exist
fn ground_expression(schema: &TenantSchema, table: &str, expression: &str) -> Result<(), String> {
    let stmt = Statement::parse(&format!("SELECT {}", expression))
        .map_err(|e| format!("unreadable expression: {}", e))?;
    if !stmt.tables().is_empty() || stmt.has_subquery() || stmt.statement_count() > 1 {
        return Err("derived expression must not read other tables".to_string());
    }
    for column in stmt.bare_columns() {
        if schema.column(table, &column.column).is_none() {
            return Err(format!("expression references unknown column {}.{}", table, column.column));
        }
    }
    for column in stmt.qualified_columns() {
        let qualifier = column.qualifier.unwrap_or_default();
        if schema.column(&qualifier, &column.column).is_none() {
            return Err(format!("expression references unknown column {}.{}", qualifier, column.column));
        }
    }
    Ok(())
}

fn constant_literal(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(format!("'{}'", s.replace('\'', "''"))),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        _ => None,
    }
}
