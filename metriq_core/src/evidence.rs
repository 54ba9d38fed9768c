//! Audit evidence derivation.
//!
//! Evidence is derived from the executed plan and its result, never by
//! re-running anything. Row identifiers are 1-indexed counting the header
//! line, so the first data row of a source file is row 2. Aggregated
//! results have no single backing row; their `row_ids` is empty and such
//! results are unverifiable at row level, which is a named limitation.

use serde::Serialize;

use crate::executor::aggregate::{AggExpr, AggFunc};
use crate::executor::QueryResult;
use crate::plan::{FilterOp, QueryPlan, SortDirection};
use crate::value::Value;

const SAMPLE_ROWS: usize = 3;
/// 0-based data row to 1-based file row counting the header.
const HEADER_OFFSET: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Lookup,
    Count,
    AggregateSum,
    AggregateMean,
    GroupAggregate,
    Filter,
    Rank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    First,
    All,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvidenceRecord {
    pub operation: OperationKind,
    pub match_policy: MatchPolicy,
    pub filters_applied: Vec<String>,
    pub columns_used: Vec<String>,
    /// 1-indexed source file rows, empty when not derivable.
    pub row_ids: Vec<usize>,
    pub row_count: usize,
    pub sample_rows: Vec<Vec<Value>>,
}

/// Derive the audit record for one executed plan.
pub fn extract(plan: &QueryPlan, result: &QueryResult) -> EvidenceRecord {
    let operation = classify(plan, result);
    let match_policy = if operation == OperationKind::Lookup {
        MatchPolicy::First
    } else {
        MatchPolicy::All
    };

    let filters_applied: Vec<String> = plan
        .filters
        .iter()
        .flat_map(|f| f.leaf_conditions())
        .map(|c| c.render())
        .collect();

    let mut columns_used: Vec<String> = plan
        .filters
        .iter()
        .flat_map(|f| f.leaf_conditions())
        .map(|c| c.column.clone())
        .collect();
    for metric in &plan.metrics {
        if let Ok(expr) = AggExpr::parse(&metric.expression) {
            let column = expr.column().to_string();
            if !columns_used.contains(&column) {
                columns_used.push(column);
            }
        }
    }

    let row_ids: Vec<usize> = result
        .source_rows
        .iter()
        .flatten()
        .map(|r| r + HEADER_OFFSET)
        .collect();

    EvidenceRecord {
        operation,
        match_policy,
        filters_applied,
        columns_used,
        row_ids,
        row_count: result.row_count,
        sample_rows: result.rows.iter().take(SAMPLE_ROWS).cloned().collect(),
    }
}

fn classify(plan: &QueryPlan, result: &QueryResult) -> OperationKind {
    if !plan.group_by.is_empty() && !plan.metrics.is_empty() {
        if is_rank(plan) {
            return OperationKind::Rank;
        }
        return OperationKind::GroupAggregate;
    }
    if let Some(metric) = plan.metrics.first() {
        return match AggExpr::parse(&metric.expression) {
            Ok(AggExpr::Simple {
                func: AggFunc::Sum, ..
            }) => OperationKind::AggregateSum,
            Ok(AggExpr::Simple {
                func: AggFunc::Avg, ..
            }) => OperationKind::AggregateMean,
            _ => OperationKind::Count,
        };
    }
    if has_equality_filter(plan) && result.row_count == 1 {
        return OperationKind::Lookup;
    }
    OperationKind::Filter
}

/// A grouped plan ordered descending by a COUNT metric is a ranking.
fn is_rank(plan: &QueryPlan) -> bool {
    plan.order_by.iter().any(|ob| {
        ob.direction == SortDirection::Desc
            && plan.metrics.iter().any(|m| {
                m.name.eq_ignore_ascii_case(&ob.column)
                    && matches!(
                        AggExpr::parse(&m.expression),
                        Ok(AggExpr::Simple {
                            func: AggFunc::Count,
                            ..
                        })
                    )
            })
    })
}

fn has_equality_filter(plan: &QueryPlan) -> bool {
    plan.filters
        .iter()
        .flat_map(|f| f.leaf_conditions())
        .any(|c| c.operator == FilterOp::Eq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{FilterCondition, FilterNode, MetricSpec, OrderBy};
    use std::collections::BTreeMap;

    fn result(rows: Vec<Vec<Value>>, source_rows: Option<Vec<usize>>) -> QueryResult {
        let row_count = rows.len();
        QueryResult {
            table_id: "t_00000000".to_string(),
            table: "orders".to_string(),
            columns: vec!["c".to_string()],
            rows,
            row_count,
            rows_before_limit: row_count,
            rows_truncated: false,
            schema: BTreeMap::new(),
            execution_time_ms: 0,
            cache_hit: false,
            source_rows,
        }
    }

    fn sum_plan() -> QueryPlan {
        let mut plan = QueryPlan::new("orders");
        plan.metrics = vec![MetricSpec {
            name: "total_revenue".to_string(),
            expression: "SUM(ORDER_AMOUNT)".to_string(),
        }];
        plan.filters = Some(FilterNode::Condition(FilterCondition::new(
            "ORDER_STATUS",
            FilterOp::Eq,
            "delivered",
        )));
        plan
    }

    #[test]
    fn test_sum_classification_and_rendering() {
        let plan = sum_plan();
        let record = extract(&plan, &result(vec![vec![Value::Float(70.0)]], None));
        assert_eq!(record.operation, OperationKind::AggregateSum);
        assert_eq!(record.match_policy, MatchPolicy::All);
        assert_eq!(record.filters_applied, vec!["ORDER_STATUS = 'delivered'"]);
        assert_eq!(
            record.columns_used,
            vec!["ORDER_STATUS".to_string(), "ORDER_AMOUNT".to_string()]
        );
        // Aggregates carry no row-level proof.
        assert!(record.row_ids.is_empty());
    }

    #[test]
    fn test_count_and_mean_classification() {
        let mut plan = sum_plan();
        plan.metrics[0].expression = "COUNT(ORDER_ID)".to_string();
        let record = extract(&plan, &result(vec![vec![Value::Integer(3)]], None));
        assert_eq!(record.operation, OperationKind::Count);

        plan.metrics[0].expression = "AVG(ORDER_AMOUNT)".to_string();
        let record = extract(&plan, &result(vec![vec![Value::Float(23.3)]], None));
        assert_eq!(record.operation, OperationKind::AggregateMean);
    }

    #[test]
    fn test_rank_vs_group_aggregate() {
        let mut plan = QueryPlan::new("listening_history");
        plan.metrics = vec![MetricSpec {
            name: "count".to_string(),
            expression: "COUNT(PLAY_ID)".to_string(),
        }];
        plan.group_by = vec!["ARTIST_NAME".to_string()];
        plan.order_by = vec![OrderBy {
            column: "count".to_string(),
            direction: SortDirection::Desc,
        }];
        let record = extract(&plan, &result(Vec::new(), None));
        assert_eq!(record.operation, OperationKind::Rank);

        plan.order_by.clear();
        let record = extract(&plan, &result(Vec::new(), None));
        assert_eq!(record.operation, OperationKind::GroupAggregate);
    }

    #[test]
    fn test_lookup_needs_equality_and_single_row() {
        let mut plan = QueryPlan::new("orders");
        plan.filters = Some(FilterNode::Condition(FilterCondition::new(
            "ORDER_ID",
            FilterOp::Eq,
            "o2",
        )));
        let one = result(vec![vec![Value::Text("o2".into())]], Some(vec![1]));
        let record = extract(&plan, &one);
        assert_eq!(record.operation, OperationKind::Lookup);
        assert_eq!(record.match_policy, MatchPolicy::First);
        // Source row 1 is file row 3 (header is row 1).
        assert_eq!(record.row_ids, vec![3]);

        let many = result(
            vec![vec![Value::Text("a".into())], vec![Value::Text("b".into())]],
            Some(vec![0, 2]),
        );
        let record = extract(&plan, &many);
        assert_eq!(record.operation, OperationKind::Filter);
        assert_eq!(record.row_ids, vec![2, 4]);
    }

    #[test]
    fn test_sample_rows_capped() {
        let plan = QueryPlan::new("orders");
        let rows: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::Integer(i)]).collect();
        let record = extract(&plan, &result(rows, Some(vec![0, 1, 2, 3, 4])));
        assert_eq!(record.sample_rows.len(), 3);
        assert_eq!(record.row_count, 5);
    }
}
