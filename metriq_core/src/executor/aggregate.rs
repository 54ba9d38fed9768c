//! The closed aggregation grammar and its evaluation.
//!
//! Metric expressions are not SQL: only `COUNT(col)`, `COUNT(DISTINCT col)`,
//! `SUM(col)`, `AVG(col)` and the fixed repeat-customers expression parse.
//! Anything else is an UnsupportedMetric error, never a best-effort guess.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::QueryError;
use crate::frame::Frame;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
}

/// A parsed aggregation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum AggExpr {
    Simple {
        func: AggFunc,
        distinct: bool,
        column: String,
    },
    /// Distinct values of `column` appearing on more than one row.
    MultiRowDistinct { column: String },
}

fn simple_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*(COUNT|SUM|AVG)\s*\(\s*(DISTINCT\s+)?([A-Za-z0-9_]+)\s*\)\s*$")
            .unwrap()
    })
}

fn repeat_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*COUNT\s*\(\s*DISTINCT\s+([A-Za-z0-9_]+)\s*\)\s*FILTER\s*\(\s*WHERE\s+ORDER_COUNT\s*>\s*1\s*\)\s*$",
        )
        .unwrap()
    })
}

impl AggExpr {
    pub fn parse(expression: &str) -> Result<Self, QueryError> {
        if let Some(caps) = repeat_pattern().captures(expression) {
            return Ok(AggExpr::MultiRowDistinct {
                column: caps[1].to_string(),
            });
        }
        if let Some(caps) = simple_pattern().captures(expression) {
            let func = match caps[1].to_uppercase().as_str() {
                "COUNT" => AggFunc::Count,
                "SUM" => AggFunc::Sum,
                _ => AggFunc::Avg,
            };
            let distinct = caps.get(2).is_some();
            if distinct && func != AggFunc::Count {
                return Err(QueryError::UnsupportedMetric {
                    expression: expression.to_string(),
                });
            }
            return Ok(AggExpr::Simple {
                func,
                distinct,
                column: caps[3].to_string(),
            });
        }
        Err(QueryError::UnsupportedMetric {
            expression: expression.to_string(),
        })
    }

    pub fn column(&self) -> &str {
        match self {
            AggExpr::Simple { column, .. } => column,
            AggExpr::MultiRowDistinct { column } => column,
        }
    }

    /// Evaluate over the given rows of `frame` (indices into `frame.rows`).
    pub fn compute(&self, frame: &Frame, rows: &[usize]) -> Result<Value, QueryError> {
        let column = self.column();
        let idx = frame
            .resolve_column(column)
            .map(str::to_string)
            .and_then(|name| frame.column_index(&name))
            .ok_or_else(|| QueryError::ColumnNotFound {
                table: frame.name.clone(),
                columns: vec![column.to_string()],
            })?;

        match self {
            AggExpr::Simple {
                func: AggFunc::Count,
                distinct: false,
                ..
            } => {
                let count = rows
                    .iter()
                    .filter(|&&r| !frame.rows[r][idx].is_null())
                    .count();
                Ok(Value::Integer(count as i64))
            }
            AggExpr::Simple {
                func: AggFunc::Count,
                distinct: true,
                ..
            } => {
                let mut seen: Vec<String> = rows
                    .iter()
                    .filter(|&&r| !frame.rows[r][idx].is_null())
                    .map(|&r| frame.rows[r][idx].coerce_text())
                    .collect();
                seen.sort_unstable();
                seen.dedup();
                Ok(Value::Integer(seen.len() as i64))
            }
            AggExpr::Simple { func, .. } => {
                let mut sum = 0.0;
                let mut n = 0usize;
                for &r in rows {
                    let cell = &frame.rows[r][idx];
                    let value =
                        cell.coerce_numeric()
                            .ok_or_else(|| QueryError::TypeMismatch {
                                column: column.to_string(),
                                message: format!("'{}' is not numeric", cell.coerce_text()),
                            })?;
                    sum += value;
                    n += 1;
                }
                match func {
                    AggFunc::Sum => Ok(Value::Float(sum)),
                    AggFunc::Avg if n > 0 => Ok(Value::Float(sum / n as f64)),
                    _ => Ok(Value::Float(0.0)),
                }
            }
            AggExpr::MultiRowDistinct { .. } => {
                let mut per_key: HashMap<String, usize> = HashMap::new();
                for &r in rows {
                    let cell = &frame.rows[r][idx];
                    if cell.is_null() {
                        continue;
                    }
                    *per_key.entry(cell.coerce_text()).or_insert(0) += 1;
                }
                let repeaters = per_key.values().filter(|&&n| n > 1).count();
                Ok(Value::Integer(repeaters as i64))
            }
        }
    }
}
