//! Structured query plans and the filter tree.
//!
//! Filters arrive in one of three shapes at the boundary (a bare condition,
//! a list of conditions, or a nested AND/OR group); deserialization folds
//! them all into the single [`FilterNode`] variant type, with a bare list
//! becoming an implicit AND group. Evaluation never has to care about shape.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A typed filter operand. No duck typing: the variant decides which
/// coercion path a comparison takes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    NumberList(Vec<f64>),
    TextList(Vec<String>),
}

impl FilterValue {
    pub fn is_list(&self) -> bool {
        matches!(self, FilterValue::NumberList(_) | FilterValue::TextList(_))
    }

    pub fn render(&self) -> String {
        match self {
            FilterValue::Number(n) => Value::Float(*n).coerce_text(),
            FilterValue::Text(s) => format!("'{}'", s),
            FilterValue::NumberList(ns) => {
                let items: Vec<String> =
                    ns.iter().map(|n| Value::Float(*n).coerce_text()).collect();
                format!("[{}]", items.join(", "))
            }
            FilterValue::TextList(ts) => {
                let items: Vec<String> = ts.iter().map(|t| format!("'{}'", t)).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Number(n)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Number(n as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "IN", alias = "in")]
    In,
    #[serde(rename = "LIKE", alias = "like")]
    Like,
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Ge => ">=",
            FilterOp::Le => "<=",
            FilterOp::In => "IN",
            FilterOp::Like => "LIKE",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub column: String,
    pub operator: FilterOp,
    pub value: FilterValue,
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, operator: FilterOp, value: impl Into<FilterValue>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    /// Human-readable rendering for evidence records, e.g. `status = 'paid'`.
    pub fn render(&self) -> String {
        format!("{} {} {}", self.column, self.operator, self.value.render())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

/// The normalized filter tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group {
        op: LogicalOp,
        conditions: Vec<FilterNode>,
    },
    Condition(FilterCondition),
}

impl FilterNode {
    /// Implicit AND over a list of conditions.
    pub fn all(conditions: Vec<FilterCondition>) -> Self {
        FilterNode::Group {
            op: LogicalOp::And,
            conditions: conditions.into_iter().map(FilterNode::Condition).collect(),
        }
    }

    pub fn any(conditions: Vec<FilterCondition>) -> Self {
        FilterNode::Group {
            op: LogicalOp::Or,
            conditions: conditions.into_iter().map(FilterNode::Condition).collect(),
        }
    }

    /// Every leaf condition in the tree, in order.
    pub fn leaf_conditions(&self) -> Vec<&FilterCondition> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a FilterCondition>) {
        match self {
            FilterNode::Condition(c) => out.push(c),
            FilterNode::Group { conditions, .. } => {
                for node in conditions {
                    node.collect_leaves(out);
                }
            }
        }
    }
}

// Accept the three boundary shapes and normalize immediately.
impl<'de> Deserialize<'de> for FilterNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Group {
                op: LogicalOp,
                conditions: Vec<Shape>,
            },
            Condition(FilterCondition),
            List(Vec<Shape>),
        }

        fn normalize(shape: Shape) -> FilterNode {
            match shape {
                Shape::Condition(c) => FilterNode::Condition(c),
                Shape::Group { op, conditions } => FilterNode::Group {
                    op,
                    conditions: conditions.into_iter().map(normalize).collect(),
                },
                Shape::List(items) => FilterNode::Group {
                    op: LogicalOp::And,
                    conditions: items.into_iter().map(normalize).collect(),
                },
            }
        }

        Ok(normalize(Shape::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
}

impl TimeGrain {
    pub fn suffix(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
        }
    }
}

/// Relative period tokens resolved against the newest timestamp in the
/// filtered data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodToken {
    CurrentDay,
    PreviousDay,
    CurrentWeek,
    PreviousWeek,
    CurrentMonth,
    PreviousMonth,
    SameMonthLastYear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub column: String,
    #[serde(default = "default_direction")]
    pub direction: SortDirection,
}

fn default_direction() -> SortDirection {
    SortDirection::Asc
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub expression: String,
}

/// The executable plan. Every field that can change output is part of the
/// cache key, so this whole struct serializes deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub table: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub filters: Option<FilterNode>,
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub time_column: Option<String>,
    #[serde(default)]
    pub time_grain: Option<TimeGrain>,
    #[serde(default)]
    pub baseline_period: Option<PeriodToken>,
    #[serde(default)]
    pub compare_period: Option<PeriodToken>,
}

fn default_limit() -> usize {
    1000
}

impl QueryPlan {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            metrics: Vec::new(),
            filters: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: default_limit(),
            time_column: None,
            time_grain: None,
            baseline_period: None,
            compare_period: None,
        }
    }
}

/// How the resolver arrived at the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOperation {
    Aggregate,
    Rank,
}

/// A resolved metric with its match diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricMatch {
    pub name: String,
    pub alias_matched: String,
    pub expression: String,
    pub requires: Vec<String>,
    pub filters: Vec<FilterCondition>,
    pub format: String,
    pub match_score: f64,
    pub base_score: f64,
    pub context_boost: f64,
    pub context_boost_reasons: Vec<String>,
    pub matched_phrase: String,
}

/// Output of semantic resolution: one metric, its table, merged auto
/// filters, and a confidence score. Created per request, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedPlan {
    pub tables: Vec<String>,
    pub metrics: Vec<MetricMatch>,
    pub filters: Vec<FilterCondition>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub time_column: Option<String>,
    pub time_grain: Option<TimeGrain>,
    pub baseline_period: Option<PeriodToken>,
    pub compare_period: Option<PeriodToken>,
    pub confidence: f64,
    pub operation: PlanOperation,
    pub dictionary_version: String,
}

impl ResolvedPlan {
    /// Lower the resolved plan into an executable [`QueryPlan`].
    pub fn to_query_plan(&self) -> QueryPlan {
        QueryPlan {
            table: self.tables.first().cloned().unwrap_or_default(),
            columns: Vec::new(),
            metrics: self
                .metrics
                .iter()
                .map(|m| MetricSpec {
                    name: m.name.clone(),
                    expression: m.expression.clone(),
                })
                .collect(),
            filters: if self.filters.is_empty() {
                None
            } else {
                Some(FilterNode::all(self.filters.clone()))
            },
            group_by: self.group_by.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit.unwrap_or_else(default_limit),
            time_column: self.time_column.clone(),
            time_grain: self.time_grain,
            baseline_period: self.baseline_period,
            compare_period: self.compare_period,
        }
    }
}
