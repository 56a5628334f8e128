//! Relationship Analyzer
//!
//! Infers join edges from declared foreign keys and naming conventions, then
//! plans the joins needed to reach a set of tables. Pure and deterministic:
//! the same schema always yields the same edges in the same order.

use inflector::Inflector;
use petgraph::algo::astar;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::HashMap;
use tenantql_model::{JoinStep, JoinStrategy, JoinType, Table, TenantSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeSource {
    /// Declared foreign key
    ForeignKey,
    /// `customer_id` -> `customers.id`
    NamingConvention,
    /// `award_id` -> `award_transactions.id`
    TablePrefix,
    /// Same `_id` column in two tables, neither owning it
    SharedColumn,
}

impl EdgeSource {
    pub fn confidence(&self) -> f64 {
        match self {
            EdgeSource::ForeignKey => 1.0,
            EdgeSource::NamingConvention => 0.9,
            EdgeSource::TablePrefix => 0.7,
            EdgeSource::SharedColumn => 0.5,
        }
    }
}

/// Candidate join edge `from_table.from_column = to_table.to_column`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferredEdge {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    pub confidence: f64,
    pub source: EdgeSource,
    /// Whether the referencing column admits NULL
    pub nullable: bool,
}

impl InferredEdge {
    fn new(from: &Table, from_column: &str, to: &Table, to_column: &str, source: EdgeSource) -> Self {
        let nullable = from.column(from_column).map(|c| c.nullable).unwrap_or(true);
        Self {
            from_table: from.name.clone(),
            from_column: from_column.to_string(),
            to_table: to.name.clone(),
            to_column: to_column.to_string(),
            confidence: source.confidence(),
            source,
            nullable,
        }
    }

    pub fn condition(&self) -> String {
        format!(
            "{}.{} = {}.{}",
            self.from_table, self.from_column, self.to_table, self.to_column
        )
    }

    /// INNER only when a declared key guarantees a match
    pub fn join_type(&self) -> JoinType {
        if self.source == EdgeSource::ForeignKey && !self.nullable {
            JoinType::Inner
        } else {
            JoinType::Left
        }
    }

    fn key(&self) -> (String, String) {
        let a = format!("{}.{}", self.from_table, self.from_column).to_lowercase();
        let b = format!("{}.{}", self.to_table, self.to_column).to_lowercase();
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn touches(&self, table: &str) -> bool {
        self.from_table.eq_ignore_ascii_case(table) || self.to_table.eq_ignore_ascii_case(table)
    }
}

/// All candidate join edges for a schema, best first
pub fn infer_edges(schema: &TenantSchema) -> Vec<InferredEdge> {
    let mut edges: Vec<InferredEdge> = Vec::new();

    for rel in &schema.relationships {
        if let (Some(from), Some(to)) = (schema.table(&rel.table), schema.table(&rel.target_table)) {
            edges.push(InferredEdge::new(
                from,
                &rel.column,
                to,
                &rel.target_column,
                EdgeSource::ForeignKey,
            ));
        }
    }

    for table in &schema.tables {
        for column in &table.columns {
            let lower = column.name.to_lowercase();
            let Some(stem) = lower.strip_suffix("_id").filter(|s| !s.is_empty()) else {
                continue;
            };
            // a table's own key is not a reference
            if column.primary_key && is_self_named(&table.name, stem) {
                continue;
            }
            edges.extend(heuristic_edges(schema, table, &column.name, stem));
        }
    }

    dedupe(edges)
}

fn is_self_named(table: &str, stem: &str) -> bool {
    let table = table.to_lowercase();
    table == stem || table.to_singular() == stem || table.to_plural() == stem
}

fn heuristic_edges(schema: &TenantSchema, table: &Table, column: &str, stem: &str) -> Vec<InferredEdge> {
    let others = schema
        .tables
        .iter()
        .filter(|t| !t.name.eq_ignore_ascii_case(&table.name));

    // customer_id -> customer(s).id / customer(s).customer_id
    let owners: Vec<InferredEdge> = others
        .clone()
        .filter(|t| is_self_named(&t.name, stem))
        .filter_map(|t| {
            key_column(t, column).map(|key| InferredEdge::new(table, column, t, &key, EdgeSource::NamingConvention))
        })
        .collect();
    if !owners.is_empty() {
        return owners;
    }

    // award_id -> award_transactions.id
    let prefix = format!("{}_", stem);
    let prefixed: Vec<InferredEdge> = others
        .clone()
        .filter(|t| t.name.to_lowercase().starts_with(&prefix) && t.has_column("id"))
        .map(|t| InferredEdge::new(table, column, t, "id", EdgeSource::TablePrefix))
        .collect();
    if !prefixed.is_empty() {
        return prefixed;
    }

    others
        .filter(|t| t.has_column(column))
        .map(|t| {
            let to_column = t.column(column).map(|c| c.name.clone()).unwrap_or_else(|| column.to_string());
            InferredEdge::new(table, column, t, &to_column, EdgeSource::SharedColumn)
        })
        .collect()
}

/// Column of `target` that `column` most plausibly points at
fn key_column(target: &Table, column: &str) -> Option<String> {
    if let Some(pk) = target
        .primary_keys()
        .find(|c| c.name.eq_ignore_ascii_case(column) || c.name.eq_ignore_ascii_case("id"))
    {
        return Some(pk.name.clone());
    }
    target
        .column("id")
        .or_else(|| target.column(column))
        .map(|c| c.name.clone())
}

fn dedupe(edges: Vec<InferredEdge>) -> Vec<InferredEdge> {
    let mut best: HashMap<(String, String), InferredEdge> = HashMap::new();
    for edge in edges {
        let key = edge.key();
        match best.get(&key) {
            Some(existing) if existing.confidence >= edge.confidence => {}
            _ => {
                best.insert(key, edge);
            }
        }
    }
    let mut out: Vec<InferredEdge> = best.into_values().collect();
    out.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.from_table.cmp(&b.from_table))
            .then_with(|| a.from_column.cmp(&b.from_column))
            .then_with(|| a.to_table.cmp(&b.to_table))
    });
    out
}

/// Plan joins from `primary` to every table in `required`.
///
/// Paths minimise the sum of `1 - confidence` per hop, so one declared key is
/// preferred over a chain of guesses. Tables that cannot be reached are
/// listed in `unreachable` rather than silently dropped.
pub fn build_join_strategy(
    schema: &TenantSchema,
    edges: &[InferredEdge],
    primary: &str,
    required: &[String],
) -> JoinStrategy {
    let primary_name = schema
        .table(primary)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| primary.to_string());
    let mut strategy = JoinStrategy::single(primary_name.clone());

    let mut graph: UnGraph<String, usize> = UnGraph::new_undirected();
    let mut nodes: HashMap<String, NodeIndex> = HashMap::new();
    for table in &schema.tables {
        nodes.insert(table.name.to_lowercase(), graph.add_node(table.name.clone()));
    }

    // keep only the strongest edge per table pair; edges are sorted best first
    let mut pairs: HashMap<(NodeIndex, NodeIndex), usize> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        let (Some(&a), Some(&b)) = (
            nodes.get(&edge.from_table.to_lowercase()),
            nodes.get(&edge.to_table.to_lowercase()),
        ) else {
            continue;
        };
        let pair = if a < b { (a, b) } else { (b, a) };
        if let std::collections::hash_map::Entry::Vacant(slot) = pairs.entry(pair) {
            slot.insert(idx);
            graph.add_edge(a, b, idx);
        }
    }

    let Some(&start) = nodes.get(&primary_name.to_lowercase()) else {
        strategy.unreachable = required
            .iter()
            .filter(|t| !t.eq_ignore_ascii_case(&primary_name))
            .cloned()
            .collect();
        strategy.confidence = 0.0;
        return strategy;
    };

    let mut joined: Vec<NodeIndex> = vec![start];
    let mut confidence: f64 = 1.0;

    for target in required {
        let Some(&goal) = nodes.get(&target.to_lowercase()) else {
            strategy.unreachable.push(target.clone());
            continue;
        };
        if joined.contains(&goal) {
            continue;
        }
        let path = astar(
            &graph,
            start,
            |n| n == goal,
            |e| 1.0 - edges[*e.weight()].confidence + 0.01,
            |_| 0.0,
        );
        let Some((_, path)) = path else {
            strategy.unreachable.push(target.clone());
            continue;
        };

        for hop in path.windows(2) {
            let (from, to) = (hop[0], hop[1]);
            if joined.contains(&to) {
                continue;
            }
            let pair = if from < to { (from, to) } else { (to, from) };
            let Some(&edge_idx) = pairs.get(&pair) else {
                continue;
            };
            let edge = &edges[edge_idx];
            confidence = confidence.min(edge.confidence);
            strategy.joins.push(JoinStep {
                table: graph[to].clone(),
                join_type: edge.join_type(),
                condition: edge.condition(),
            });
            joined.push(to);
        }
    }

    strategy.confidence = confidence;
    strategy
}

/// Edges that involve `table`, for prompts and diagnostics
pub fn edges_for<'a>(edges: &'a [InferredEdge], table: &'a str) -> impl Iterator<Item = &'a InferredEdge> + 'a {
    edges.iter().filter(move |e| e.touches(table))
}
