//! Filter tree compilation and row evaluation.
//!
//! Filters are validated and compiled against a concrete frame before any
//! row is touched: unknown columns, operator/operand mismatches, and bad
//! LIKE patterns all fail up front, so per-row evaluation only ever fails
//! on cell-level coercion.

use regex::Regex;

use crate::error::QueryError;
use crate::frame::Frame;
use crate::plan::{FilterCondition, FilterNode, FilterOp, FilterValue, LogicalOp};
use crate::value::Value;

pub struct CompiledCondition {
    column: String,
    column_index: usize,
    operator: FilterOp,
    value: FilterValue,
    like: Option<Regex>,
}

pub enum CompiledFilter {
    Group {
        op: LogicalOp,
        children: Vec<CompiledFilter>,
    },
    Condition(CompiledCondition),
}

impl CompiledFilter {
    /// Validate a filter tree against the frame and precompile LIKE patterns.
    pub fn compile(node: &FilterNode, frame: &Frame) -> Result<Self, QueryError> {
        match node {
            FilterNode::Group { op, conditions } => {
                if conditions.is_empty() {
                    return Err(QueryError::InvalidFilter {
                        message: "empty filter group".to_string(),
                    });
                }
                let children = conditions
                    .iter()
                    .map(|c| Self::compile(c, frame))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(CompiledFilter::Group { op: *op, children })
            }
            FilterNode::Condition(cond) => {
                Ok(CompiledFilter::Condition(compile_condition(cond, frame)?))
            }
        }
    }

    /// Does row `row` of `frame` satisfy the filter? Groups short-circuit.
    pub fn matches(&self, frame: &Frame, row: usize) -> Result<bool, QueryError> {
        match self {
            CompiledFilter::Group { op, children } => {
                for child in children {
                    let hit = child.matches(frame, row)?;
                    match op {
                        LogicalOp::And if !hit => return Ok(false),
                        LogicalOp::Or if hit => return Ok(true),
                        _ => {}
                    }
                }
                Ok(matches!(op, LogicalOp::And))
            }
            CompiledFilter::Condition(cond) => cond.matches(frame, row),
        }
    }
}

fn compile_condition(
    cond: &FilterCondition,
    frame: &Frame,
) -> Result<CompiledCondition, QueryError> {
    let resolved = frame
        .resolve_column(&cond.column)
        .ok_or_else(|| QueryError::ColumnNotFound {
            table: frame.name.clone(),
            columns: vec![cond.column.clone()],
        })?
        .to_string();
    let column_index = frame
        .column_index(&resolved)
        .ok_or_else(|| QueryError::ColumnNotFound {
            table: frame.name.clone(),
            columns: vec![cond.column.clone()],
        })?;

    match (cond.operator, &cond.value) {
        (FilterOp::In, v) if !v.is_list() => {
            return Err(QueryError::InvalidFilter {
                message: format!("IN on '{}' requires a list operand", cond.column),
            });
        }
        (FilterOp::In, FilterValue::NumberList(l)) if l.is_empty() => {
            return Err(QueryError::InvalidFilter {
                message: format!("IN on '{}' requires a non-empty list", cond.column),
            });
        }
        (FilterOp::In, FilterValue::TextList(l)) if l.is_empty() => {
            return Err(QueryError::InvalidFilter {
                message: format!("IN on '{}' requires a non-empty list", cond.column),
            });
        }
        (op, v) if op != FilterOp::In && v.is_list() => {
            return Err(QueryError::InvalidFilter {
                message: format!("{} on '{}' cannot take a list operand", op, cond.column),
            });
        }
        (FilterOp::Like, FilterValue::Number(_)) => {
            return Err(QueryError::InvalidFilter {
                message: format!("LIKE on '{}' requires a text pattern", cond.column),
            });
        }
        _ => {}
    }

    let like = match (cond.operator, &cond.value) {
        (FilterOp::Like, FilterValue::Text(pattern)) => {
            Some(
                like_to_regex(pattern).map_err(|e| QueryError::InvalidFilter {
                    message: format!("bad LIKE pattern on '{}': {}", cond.column, e),
                })?,
            )
        }
        _ => None,
    };

    Ok(CompiledCondition {
        column: resolved,
        column_index,
        operator: cond.operator,
        value: cond.value.clone(),
        like,
    })
}

/// SQL LIKE to an anchored case-insensitive regex: `%` is any run, `_` is
/// any single character, everything else literal.
fn like_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut translated = String::with_capacity(pattern.len() + 8);
    translated.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '%' => translated.push_str(".*"),
            '_' => translated.push('.'),
            c => translated.push_str(&regex::escape(&c.to_string())),
        }
    }
    translated.push('$');
    Regex::new(&translated)
}

impl CompiledCondition {
    fn matches(&self, frame: &Frame, row: usize) -> Result<bool, QueryError> {
        let cell = &frame.rows[row][self.column_index];
        if matches!(cell, Value::Null) {
            return Err(QueryError::TypeMismatch {
                column: self.column.clone(),
                message: "null value in filtered column".to_string(),
            });
        }

        match &self.value {
            FilterValue::Number(operand) => {
                let actual = cell
                    .coerce_numeric()
                    .ok_or_else(|| self.non_numeric(cell))?;
                Ok(compare_f64(actual, *operand, self.operator))
            }
            FilterValue::Text(operand) => match self.operator {
                FilterOp::Like => {
                    let regex =
                        self.like
                            .as_ref()
                            .ok_or_else(|| QueryError::InvalidFilter {
                                message: format!(
                                    "LIKE on '{}' missing compiled pattern",
                                    self.column
                                ),
                            })?;
                    Ok(regex.is_match(&cell.coerce_text()))
                }
                // Equality auto-detects: numeric when both sides coerce,
                // otherwise exact string comparison.
                FilterOp::Eq | FilterOp::Ne => {
                    let hit = match (operand.trim().parse::<f64>().ok(), cell.coerce_numeric()) {
                        (Some(rhs), Some(lhs)) => (lhs - rhs).abs() < f64::EPSILON,
                        _ => text_eq(cell, operand),
                    };
                    Ok(if self.operator == FilterOp::Ne { !hit } else { hit })
                }
                // Ordering over a text operand still demands numbers on
                // both sides; lexicographic ranges are not supported.
                op => {
                    let rhs = operand.trim().parse::<f64>().map_err(|_| {
                        QueryError::TypeMismatch {
                            column: self.column.clone(),
                            message: format!(
                                "ordering comparison requires a numeric operand, got '{}'",
                                operand
                            ),
                        }
                    })?;
                    let lhs = cell
                        .coerce_numeric()
                        .ok_or_else(|| self.non_numeric(cell))?;
                    Ok(compare_f64(lhs, rhs, op))
                }
            },
            FilterValue::NumberList(operands) => {
                let actual = cell
                    .coerce_numeric()
                    .ok_or_else(|| self.non_numeric(cell))?;
                Ok(operands.iter().any(|o| (actual - o).abs() < f64::EPSILON))
            }
            FilterValue::TextList(operands) => {
                // Numeric set-membership when every candidate is numeric,
                // otherwise exact string membership.
                let numeric: Option<Vec<f64>> = operands
                    .iter()
                    .map(|o| o.trim().parse::<f64>().ok())
                    .collect();
                match numeric {
                    Some(candidates) => {
                        let actual = cell
                            .coerce_numeric()
                            .ok_or_else(|| self.non_numeric(cell))?;
                        Ok(candidates.iter().any(|o| (actual - o).abs() < f64::EPSILON))
                    }
                    None => Ok(operands.iter().any(|o| text_eq(cell, o))),
                }
            }
        }
    }

    fn non_numeric(&self, cell: &Value) -> QueryError {
        QueryError::TypeMismatch {
            column: self.column.clone(),
            message: format!("'{}' is not numeric", cell.coerce_text()),
        }
    }
}

fn text_eq(cell: &Value, operand: &str) -> bool {
    cell.coerce_text() == operand
}

fn compare_f64(actual: f64, operand: f64, op: FilterOp) -> bool {
    match op {
        FilterOp::Eq => (actual - operand).abs() < f64::EPSILON,
        FilterOp::Ne => (actual - operand).abs() >= f64::EPSILON,
        FilterOp::Gt => actual > operand,
        FilterOp::Lt => actual < operand,
        FilterOp::Ge => actual >= operand,
        FilterOp::Le => actual <= operand,
        // List and pattern operators are rejected at compile time.
        FilterOp::In | FilterOp::Like => false,
    }
}

/// Drop every row of `frame` that does not satisfy `node`.
pub fn apply(frame: &mut Frame, node: &FilterNode) -> Result<(), QueryError> {
    let compiled = CompiledFilter::compile(node, frame)?;
    let mut mask = Vec::with_capacity(frame.len());
    for row in 0..frame.len() {
        mask.push(compiled.matches(frame, row)?);
    }
    frame.retain_rows(&mask);
    Ok(())
}
