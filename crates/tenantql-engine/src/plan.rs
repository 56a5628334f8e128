//! Execution plan and performance hints attached to a finished translation

use tenantql_model::{ExecutionPlan, JoinStrategy, PlanComplexity, QueryAnalysis};
use tenantql_sql::Statement;

/// Plans with more joins than this are rated high
const HIGH_JOIN_COUNT: usize = 3;

pub fn execution_plan(analysis: &QueryAnalysis, strategy: &JoinStrategy) -> ExecutionPlan {
    let mut tables_involved = vec![strategy.primary_table.clone()];
    let mut recommended_indexes: Vec<String> = Vec::new();
    for join in &strategy.joins {
        if !tables_involved.iter().any(|t| t.eq_ignore_ascii_case(&join.table)) {
            tables_involved.push(join.table.clone());
        }
        if let Some(key) = join_key(&join.condition, &join.table) {
            if !recommended_indexes.contains(&key) {
                recommended_indexes.push(key);
            }
        }
    }

    let join_count = strategy.joins.len();
    let estimated_complexity = if join_count > HIGH_JOIN_COUNT {
        PlanComplexity::High
    } else if join_count > 0 || analysis.has_aggregation || analysis.has_subquery {
        PlanComplexity::Medium
    } else {
        PlanComplexity::Low
    };

    ExecutionPlan {
        tables_involved,
        join_count,
        estimated_complexity,
        recommended_indexes,
    }
}

/// The `table.column` side of `a.x = b.y` that belongs to the joined table
fn join_key(condition: &str, joined_table: &str) -> Option<String> {
    let (left, right) = condition.split_once('=')?;
    let (left, right) = (left.trim(), right.trim());
    let belongs = |side: &str| {
        side.split_once('.')
            .map(|(table, _)| table.eq_ignore_ascii_case(joined_table))
            .unwrap_or(false)
    };
    let key = if belongs(left) { left } else { right };
    key.contains('.').then(|| key.to_string())
}

pub fn performance_hints(sql: &str, plan: &ExecutionPlan) -> Vec<String> {
    let mut hints: Vec<String> = plan
        .recommended_indexes
        .iter()
        .map(|key| format!("consider an index on {}", key))
        .collect();
    if plan.join_count > 2 {
        hints.push(format!(
            "{} joins; order them so the most selective table is joined first",
            plan.join_count
        ));
    }
    let filters = Statement::parse(sql)
        .map(|stmt| stmt.significant().any(|t| t.is_keyword("WHERE")))
        .unwrap_or(false);
    if filters {
        hints.push("WHERE conditions should use indexed columns".to_string());
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantql_model::{Complexity, JoinStep, JoinType};

    fn analysis(has_aggregation: bool) -> QueryAnalysis {
        QueryAnalysis {
            complexity: Complexity::Complex,
            tables_referenced: vec!["contracts".to_string()],
            columns_referenced: vec![],
            has_join: false,
            has_aggregation,
            has_derived_field: false,
            has_subquery: false,
            derived_fields: vec![],
        }
    }

    fn join(table: &str, condition: &str) -> JoinStep {
        JoinStep {
            table: table.to_string(),
            join_type: JoinType::Left,
            condition: condition.to_string(),
        }
    }

    #[test]
    fn test_single_table_plan_is_low() {
        let plan = execution_plan(&analysis(false), &JoinStrategy::single("awards"));
        assert_eq!(plan.tables_involved, vec!["awards"]);
        assert_eq!(plan.join_count, 0);
        assert_eq!(plan.estimated_complexity, PlanComplexity::Low);
        assert!(performance_hints("SELECT description FROM awards", &plan).is_empty());

        let plan = execution_plan(&analysis(true), &JoinStrategy::single("awards"));
        assert_eq!(plan.estimated_complexity, PlanComplexity::Medium);
    }

    #[test]
    fn test_join_keys_become_index_hints() {
        let mut strategy = JoinStrategy::single("awards");
        strategy.joins = vec![
            join("recipients", "awards.recipient_id = recipients.id"),
            join("agencies", "agencies.id = awards.awarding_agency_id"),
        ];
        let plan = execution_plan(&analysis(false), &strategy);
        assert_eq!(plan.tables_involved, vec!["awards", "recipients", "agencies"]);
        assert_eq!(plan.recommended_indexes, vec!["recipients.id", "agencies.id"]);
        assert_eq!(plan.estimated_complexity, PlanComplexity::Medium);

        let hints = performance_hints("SELECT 1 FROM awards WHERE total_obligation > 5", &plan);
        assert_eq!(
            hints,
            vec![
                "consider an index on recipients.id",
                "consider an index on agencies.id",
                "WHERE conditions should use indexed columns",
            ]
        );
    }

    #[test]
    fn test_many_joins_rate_high() {
        let mut strategy = JoinStrategy::single("a");
        strategy.joins = ["b", "c", "d", "e"]
            .iter()
            .map(|t| join(t, &format!("a.{t}_id = {t}.id")))
            .collect();
        let plan = execution_plan(&analysis(false), &strategy);
        assert_eq!(plan.join_count, 4);
        assert_eq!(plan.estimated_complexity, PlanComplexity::High);
        let hints = performance_hints("SELECT 1 FROM a", &plan);
        assert!(hints.iter().any(|h| h.starts_with("4 joins")));
    }
}
