//! Plan execution against an in-memory frame.
//!
//! The executor is deliberately closed: structured plans in, typed rows
//! out. There is no expression evaluator and no dynamic code path; every
//! computation is one of the fixed aggregation forms over explicitly
//! validated columns.

pub mod aggregate;
pub mod filter;
pub mod timebucket;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::QueryError;
use crate::frame::Frame;
use crate::plan::{QueryPlan, SortDirection, TimeGrain};
use crate::value::Value;

use aggregate::AggExpr;

/// Fully materialized execution output.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Opaque identifier under which the result is retrievable later.
    pub table_id: String,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub rows_before_limit: usize,
    pub rows_truncated: bool,
    /// Column name to type name, for downstream formatting.
    pub schema: BTreeMap<String, String>,
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    /// 0-based source data rows backing each output row. Only projection
    /// results keep these; aggregated rows have no single source row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_rows: Option<Vec<usize>>,
}

static TABLE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Fresh `t_xxxxxxxx` identifier, unique within the process.
fn new_table_id(table: &str) -> String {
    let seq = TABLE_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update(seq.to_le_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("t_{}", hex)
}

/// Execute `plan` against `frame`. The frame is consumed; filtering and
/// bucket derivation mutate it in place.
pub fn execute_plan(plan: &QueryPlan, mut frame: Frame) -> Result<QueryResult, QueryError> {
    let start = Instant::now();

    let metric_exprs = parse_metrics(plan)?;
    let group_by = derive_buckets(&mut frame, &plan.group_by)?;
    let referenced = referenced_columns(plan, &metric_exprs, &group_by, &frame)?;
    reject_nulls(&frame, &referenced)?;

    if let Some(filters) = &plan.filters {
        filter::apply(&mut frame, filters)?;
        if frame.is_empty() {
            let rendered: Vec<String> = filters
                .leaf_conditions()
                .iter()
                .map(|c| c.render())
                .collect();
            return Err(QueryError::EmptyResult {
                table: plan.table.clone(),
                detail: format!("no rows satisfy [{}]", rendered.join(" AND ")),
            });
        }
    }

    restrict_to_periods(plan, &mut frame)?;

    let mut output = if !group_by.is_empty() {
        aggregate_grouped(&frame, &group_by, &metric_exprs)?
    } else if !metric_exprs.is_empty() {
        aggregate_global(&frame, &metric_exprs)?
    } else {
        project(&frame, &plan.columns)?
    };

    order_rows(plan, &group_by, &mut output)?;

    let rows_before_limit = output.rows.len();
    let rows_truncated = rows_before_limit > plan.limit;
    output.rows.truncate(plan.limit);
    if let Some(source) = &mut output.source_rows {
        source.truncate(plan.limit);
    }

    let schema = infer_schema(&output.columns, &output.rows);
    let table_id = new_table_id(&plan.table);
    let row_count = output.rows.len();
    debug!(
        table = %plan.table,
        %table_id,
        row_count,
        rows_truncated,
        "plan executed"
    );

    Ok(QueryResult {
        table_id,
        table: plan.table.clone(),
        columns: output.columns,
        rows: output.rows,
        row_count,
        rows_before_limit,
        rows_truncated,
        schema,
        execution_time_ms: start.elapsed().as_millis() as u64,
        cache_hit: false,
        source_rows: output.source_rows,
    })
}

struct Output {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    source_rows: Option<Vec<usize>>,
}

fn parse_metrics(plan: &QueryPlan) -> Result<Vec<(String, AggExpr)>, QueryError> {
    plan.metrics
        .iter()
        .map(|m| Ok((m.name.clone(), AggExpr::parse(&m.expression)?)))
        .collect()
}

/// Materialize `<col>__<grain>` group-by entries as derived bucket columns,
/// returning the effective group-by list.
fn derive_buckets(frame: &mut Frame, group_by: &[String]) -> Result<Vec<String>, QueryError> {
    let mut effective = Vec::with_capacity(group_by.len());
    for entry in group_by {
        let Some((base, grain)) = split_bucket_entry(entry) else {
            effective.push(entry.clone());
            continue;
        };
        let source = frame
            .resolve_column(base)
            .map(str::to_string)
            .ok_or_else(|| QueryError::ColumnNotFound {
                table: frame.name.clone(),
                columns: vec![base.to_string()],
            })?;
        let idx = frame
            .column_index(&source)
            .expect("resolved column has an index");

        let mut derived = Vec::with_capacity(frame.len());
        for row in &frame.rows {
            let cell = &row[idx];
            if cell.is_null() {
                derived.push(Value::Null);
                continue;
            }
            let ts = timebucket::parse_column_timestamp(&cell.coerce_text(), &source)?;
            derived.push(Value::Text(timebucket::bucket(ts, grain)));
        }
        let derived_name = format!("{}__{}", source, grain.suffix());
        if frame.column_index(&derived_name).is_none() {
            frame.push_column(derived_name.clone(), derived);
        }
        effective.push(derived_name);
    }
    Ok(effective)
}

fn split_bucket_entry(entry: &str) -> Option<(&str, TimeGrain)> {
    let (base, suffix) = entry.rsplit_once("__")?;
    let grain = match suffix {
        "day" => TimeGrain::Day,
        "week" => TimeGrain::Week,
        "month" => TimeGrain::Month,
        _ => return None,
    };
    Some((base, grain))
}

/// Union of every column the plan touches, resolved against the frame.
/// Missing columns are reported together.
fn referenced_columns(
    plan: &QueryPlan,
    metrics: &[(String, AggExpr)],
    group_by: &[String],
    frame: &Frame,
) -> Result<Vec<String>, QueryError> {
    let mut wanted: Vec<String> = Vec::new();
    if metrics.is_empty() {
        wanted.extend(plan.columns.iter().cloned());
    }
    if let Some(filters) = &plan.filters {
        wanted.extend(
            filters
                .leaf_conditions()
                .iter()
                .map(|c| c.column.clone()),
        );
    }
    wanted.extend(group_by.iter().cloned());
    wanted.extend(metrics.iter().map(|(_, e)| e.column().to_string()));
    if let Some(col) = &plan.time_column {
        wanted.push(col.clone());
    }

    let mut resolved = Vec::new();
    let mut missing = Vec::new();
    for name in wanted {
        match frame.resolve_column(&name) {
            Some(actual) => {
                let actual = actual.to_string();
                if !resolved.contains(&actual) {
                    resolved.push(actual);
                }
            }
            None => {
                if !missing.contains(&name) {
                    missing.push(name);
                }
            }
        }
    }
    if !missing.is_empty() {
        return Err(QueryError::ColumnNotFound {
            table: plan.table.clone(),
            columns: missing,
        });
    }
    Ok(resolved)
}

/// Nulls in any referenced column reject the whole query. Callers must
/// pre-clean data; the executor never guesses what a null means.
fn reject_nulls(frame: &Frame, referenced: &[String]) -> Result<(), QueryError> {
    for name in referenced {
        let idx = frame.column_index(name).expect("column was resolved");
        let nulls = frame.null_count(idx);
        if nulls > 0 {
            return Err(QueryError::TypeMismatch {
                column: name.clone(),
                message: format!("{} null value(s) in referenced column", nulls),
            });
        }
    }
    Ok(())
}

/// Restrict rows to the baseline (and compare) period windows, anchored at
/// the newest timestamp of the already-filtered data.
fn restrict_to_periods(plan: &QueryPlan, frame: &mut Frame) -> Result<(), QueryError> {
    let (Some(time_column), Some(baseline)) = (&plan.time_column, plan.baseline_period) else {
        return Ok(());
    };
    let source = frame
        .resolve_column(time_column)
        .map(str::to_string)
        .ok_or_else(|| QueryError::ColumnNotFound {
            table: frame.name.clone(),
            columns: vec![time_column.clone()],
        })?;
    let idx = frame
        .column_index(&source)
        .expect("resolved column has an index");

    let mut dates: Vec<NaiveDate> = Vec::with_capacity(frame.len());
    for row in &frame.rows {
        let ts = timebucket::parse_column_timestamp(&row[idx].coerce_text(), &source)?;
        dates.push(ts.date());
    }
    let Some(anchor) = dates.iter().max().copied() else {
        return Ok(());
    };

    let mut windows = vec![timebucket::period_window(baseline, anchor)];
    if let Some(compare) = plan.compare_period {
        windows.push(timebucket::period_window(compare, anchor));
    }

    let mask: Vec<bool> = dates
        .iter()
        .map(|d| windows.iter().any(|w| timebucket::in_window(*d, *w)))
        .collect();
    frame.retain_rows(&mask);

    if frame.is_empty() {
        let described: Vec<String> = windows
            .iter()
            .map(|(a, b)| format!("{}..{}", a, b))
            .collect();
        return Err(QueryError::EmptyResult {
            table: frame.name.clone(),
            detail: format!(
                "no rows in period window(s) [{}] anchored at {}",
                described.join(", "),
                anchor
            ),
        });
    }
    Ok(())
}

fn aggregate_grouped(
    frame: &Frame,
    group_by: &[String],
    metrics: &[(String, AggExpr)],
) -> Result<Output, QueryError> {
    let key_indexes: Vec<usize> = group_by
        .iter()
        .map(|name| {
            frame
                .resolve_column(name)
                .map(str::to_string)
                .and_then(|actual| frame.column_index(&actual))
                .ok_or_else(|| QueryError::ColumnNotFound {
                    table: frame.name.clone(),
                    columns: vec![name.clone()],
                })
        })
        .collect::<Result<_, _>>()?;

    // Group in first-seen order; the default sort happens later.
    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, (Vec<Value>, Vec<usize>)> = HashMap::new();
    for row_idx in 0..frame.len() {
        let key: Vec<String> = key_indexes
            .iter()
            .map(|&i| frame.rows[row_idx][i].coerce_text())
            .collect();
        if !groups.contains_key(&key) {
            let display: Vec<Value> = key_indexes
                .iter()
                .map(|&i| frame.rows[row_idx][i].clone())
                .collect();
            order.push(key.clone());
            groups.insert(key.clone(), (display, Vec::new()));
        }
        if let Some((_, rows)) = groups.get_mut(&key) {
            rows.push(row_idx);
        }
    }

    let mut columns: Vec<String> = group_by.to_vec();
    columns.extend(metrics.iter().map(|(name, _)| name.clone()));

    let mut rows = Vec::with_capacity(order.len());
    for key in order {
        let (display, members) = groups
            .remove(&key)
            .expect("group key recorded in order list");
        let mut row = display;
        for (_, expr) in metrics {
            row.push(expr.compute(frame, &members)?);
        }
        rows.push(row);
    }

    Ok(Output {
        columns,
        rows,
        source_rows: None,
    })
}

fn aggregate_global(
    frame: &Frame,
    metrics: &[(String, AggExpr)],
) -> Result<Output, QueryError> {
    let all_rows: Vec<usize> = (0..frame.len()).collect();
    let mut row = Vec::with_capacity(metrics.len());
    for (_, expr) in metrics {
        row.push(expr.compute(frame, &all_rows)?);
    }
    Ok(Output {
        columns: metrics.iter().map(|(name, _)| name.clone()).collect(),
        rows: vec![row],
        source_rows: None,
    })
}

fn project(frame: &Frame, columns: &[String]) -> Result<Output, QueryError> {
    let selected: Vec<String> = if columns.is_empty() {
        frame.columns.clone()
    } else {
        columns
            .iter()
            .map(|name| {
                frame
                    .resolve_column(name)
                    .map(str::to_string)
                    .ok_or_else(|| QueryError::ColumnNotFound {
                        table: frame.name.clone(),
                        columns: vec![name.clone()],
                    })
            })
            .collect::<Result<_, _>>()?
    };
    let indexes: Vec<usize> = selected
        .iter()
        .map(|name| frame.column_index(name).expect("column was resolved"))
        .collect();
    let rows: Vec<Vec<Value>> = frame
        .rows
        .iter()
        .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
        .collect();
    Ok(Output {
        columns: selected,
        rows,
        source_rows: Some(frame.source_rows.clone()),
    })
}

fn order_rows(plan: &QueryPlan, group_by: &[String], output: &mut Output) -> Result<(), QueryError> {
    if !plan.order_by.is_empty() {
        let mut keys = Vec::with_capacity(plan.order_by.len());
        for ob in &plan.order_by {
            let idx = output
                .columns
                .iter()
                .position(|c| c.eq_ignore_ascii_case(&ob.column))
                .ok_or_else(|| QueryError::ColumnNotFound {
                    table: plan.table.clone(),
                    columns: vec![ob.column.clone()],
                })?;
            keys.push((idx, ob.direction));
        }
        sort_output(output, move |a, b| {
            for (idx, direction) in &keys {
                let ord = a[*idx].compare(&b[*idx]);
                let ord = match direction {
                    SortDirection::Asc => ord,
                    SortDirection::Desc => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    } else if !group_by.is_empty() {
        // Deterministic default: ascending by the first group key.
        sort_output(output, |a, b| a[0].compare(&b[0]));
    }
    Ok(())
}

fn sort_output<F>(output: &mut Output, cmp: F)
where
    F: Fn(&[Value], &[Value]) -> std::cmp::Ordering,
{
    match &mut output.source_rows {
        Some(source) => {
            let mut paired: Vec<(Vec<Value>, usize)> = output
                .rows
                .drain(..)
                .zip(source.drain(..))
                .collect();
            paired.sort_by(|a, b| cmp(&a.0, &b.0));
            for (row, src) in paired {
                output.rows.push(row);
                source.push(src);
            }
        }
        None => output.rows.sort_by(|a, b| cmp(a, b)),
    }
}

fn infer_schema(columns: &[String], rows: &[Vec<Value>]) -> BTreeMap<String, String> {
    let mut schema = BTreeMap::new();
    for (idx, name) in columns.iter().enumerate() {
        let mut seen = crate::value::DataType::Null;
        for row in rows {
            match (seen, row[idx].data_type()) {
                (_, crate::value::DataType::Null) => {}
                (crate::value::DataType::Null, t) => seen = t,
                (crate::value::DataType::Integer, crate::value::DataType::Float) => {
                    seen = crate::value::DataType::Float
                }
                _ => {}
            }
        }
        schema.insert(name.clone(), seen.name().to_string());
    }
    schema
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{FilterCondition, FilterNode, FilterOp, MetricSpec, OrderBy, PeriodToken};

    fn orders() -> Frame {
        Frame::new(
            "orders",
            vec![
                "ORDER_ID".to_string(),
                "CUSTOMER_ID".to_string(),
                "ORDER_STATUS".to_string(),
                "ORDER_AMOUNT".to_string(),
                "ORDER_DATE".to_string(),
            ],
            vec![
                row("o1", "c1", "delivered", 10.0, "2025-11-10"),
                row("o2", "c2", "delivered", 20.0, "2025-11-12"),
                row("o3", "c1", "delivered", 40.0, "2025-12-02"),
                row("o4", "c3", "cancelled", 999.0, "2025-12-03"),
            ],
        )
    }

    fn row(id: &str, customer: &str, status: &str, amount: f64, date: &str) -> Vec<Value> {
        vec![
            Value::Text(id.into()),
            Value::Text(customer.into()),
            Value::Text(status.into()),
            Value::Float(amount),
            Value::Text(date.into()),
        ]
    }

    fn delivered_filter() -> FilterNode {
        FilterNode::Condition(FilterCondition::new(
            "ORDER_STATUS",
            FilterOp::Eq,
            "delivered",
        ))
    }

    fn revenue_plan() -> QueryPlan {
        let mut plan = QueryPlan::new("orders");
        plan.metrics = vec![MetricSpec {
            name: "total_revenue".to_string(),
            expression: "SUM(ORDER_AMOUNT)".to_string(),
        }];
        plan.filters = Some(delivered_filter());
        plan
    }

    #[test]
    fn test_filtered_global_aggregate() {
        let result = execute_plan(&revenue_plan(), orders()).unwrap();
        assert_eq!(result.columns, vec!["total_revenue".to_string()]);
        assert_eq!(result.rows, vec![vec![Value::Float(70.0)]]);
        assert_eq!(result.row_count, 1);
        assert!(!result.cache_hit);
        assert!(result.table_id.starts_with("t_"));
        assert_eq!(result.table_id.len(), 10);
        assert_eq!(result.schema["total_revenue"], "float");
    }

    #[test]
    fn test_month_bucket_grouping() {
        let mut plan = revenue_plan();
        plan.group_by = vec!["ORDER_DATE__month".to_string()];
        let result = execute_plan(&plan, orders()).unwrap();
        assert_eq!(
            result.columns,
            vec!["ORDER_DATE__month".to_string(), "total_revenue".to_string()]
        );
        // Default sort: ascending by the bucket.
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Text("2025-11".into()), Value::Float(30.0)],
                vec![Value::Text("2025-12".into()), Value::Float(40.0)],
            ]
        );
    }

    #[test]
    fn test_empty_result_is_an_error() {
        let mut plan = revenue_plan();
        plan.filters = Some(FilterNode::Condition(FilterCondition::new(
            "ORDER_STATUS",
            FilterOp::Eq,
            "returned",
        )));
        let err = execute_plan(&plan, orders()).unwrap_err();
        match err {
            QueryError::EmptyResult { table, detail } => {
                assert_eq!(table, "orders");
                assert!(detail.contains("ORDER_STATUS"));
            }
            other => panic!("expected EmptyResult, got {other:?}"),
        }
    }

    #[test]
    fn test_null_in_referenced_column_rejected() {
        let mut frame = orders();
        frame.rows[1][3] = Value::Null;
        let err = execute_plan(&revenue_plan(), frame).unwrap_err();
        match err {
            QueryError::TypeMismatch { column, message } => {
                assert_eq!(column, "ORDER_AMOUNT");
                assert!(message.contains('1'));
            }
            other => panic!("expected TypeMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_null_outside_referenced_columns_is_fine() {
        let mut frame = orders();
        frame.rows[1][1] = Value::Null;
        assert!(execute_plan(&revenue_plan(), frame).is_ok());
    }

    #[test]
    fn test_missing_columns_reported_together() {
        let mut plan = revenue_plan();
        plan.group_by = vec!["REGION".to_string()];
        let err = execute_plan(&plan, orders()).unwrap_err();
        match err {
            QueryError::ColumnNotFound { columns, .. } => {
                assert_eq!(columns, vec!["REGION".to_string()]);
            }
            other => panic!("expected ColumnNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_date_is_a_type_mismatch() {
        let mut frame = orders();
        frame.rows[0][4] = Value::Text("soon".into());
        let mut plan = revenue_plan();
        plan.group_by = vec!["ORDER_DATE__month".to_string()];
        assert!(matches!(
            execute_plan(&plan, frame),
            Err(QueryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_period_comparison_restricts_and_buckets() {
        let mut plan = revenue_plan();
        plan.time_column = Some("ORDER_DATE".to_string());
        plan.time_grain = Some(TimeGrain::Month);
        plan.baseline_period = Some(PeriodToken::CurrentMonth);
        plan.compare_period = Some(PeriodToken::PreviousMonth);
        plan.group_by = vec!["ORDER_DATE__month".to_string()];
        let result = execute_plan(&plan, orders()).unwrap();
        // Anchor is 2025-12-02 (newest delivered row): November vs December.
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Text("2025-11".into()), Value::Float(30.0)],
                vec![Value::Text("2025-12".into()), Value::Float(40.0)],
            ]
        );
    }

    #[test]
    fn test_period_window_with_no_rows_is_empty_result() {
        let mut plan = revenue_plan();
        plan.time_column = Some("ORDER_DATE".to_string());
        plan.baseline_period = Some(PeriodToken::SameMonthLastYear);
        let err = execute_plan(&plan, orders()).unwrap_err();
        match err {
            QueryError::EmptyResult { detail, .. } => {
                assert!(detail.contains("period"));
            }
            other => panic!("expected EmptyResult, got {other:?}"),
        }
    }

    #[test]
    fn test_projection_keeps_source_rows() {
        let mut plan = QueryPlan::new("orders");
        plan.columns = vec!["ORDER_ID".to_string(), "ORDER_AMOUNT".to_string()];
        plan.filters = Some(delivered_filter());
        let result = execute_plan(&plan, orders()).unwrap();
        assert_eq!(result.row_count, 3);
        assert_eq!(result.source_rows, Some(vec![0, 1, 2]));
        assert_eq!(result.columns.len(), 2);
    }

    #[test]
    fn test_explicit_order_and_limit() {
        let mut plan = QueryPlan::new("orders");
        plan.metrics = vec![MetricSpec {
            name: "count".to_string(),
            expression: "COUNT(ORDER_ID)".to_string(),
        }];
        plan.group_by = vec!["CUSTOMER_ID".to_string()];
        plan.order_by = vec![OrderBy {
            column: "count".to_string(),
            direction: SortDirection::Desc,
        }];
        plan.limit = 1;
        let result = execute_plan(&plan, orders()).unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(result.rows_before_limit, 3);
        assert!(result.rows_truncated);
        assert_eq!(
            result.rows,
            vec![vec![Value::Text("c1".into()), Value::Integer(2)]]
        );
    }
}
