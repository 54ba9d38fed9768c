//! Keyword-driven fallback queries.
//!
//! When semantic resolution fails, this path answers a small fixed set of
//! operations by exact keyword and regex detection, bypassing the
//! dictionary entirely. Results carry a deliberately low confidence so
//! callers can always tell fallback answers from resolved ones.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::BasicQueryError;
use crate::frame::Frame;
use crate::value::Value;

const DISTINCT_CAP: usize = 100;
const DEFAULT_TOP: usize = 10;

pub const SUPPORTED_OPERATIONS: &[&str] =
    &["count", "distinct", "top", "sum", "avg", "min", "max"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BasicOperation {
    Count,
    Distinct,
    Top,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, Serialize)]
pub struct BasicResult {
    pub operation: BasicOperation,
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub confidence: f64,
    pub is_fallback: bool,
}

fn distinct_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| {
        Regex::new(r"(?:distinct|unique|unicos?|diferentes)\s+([a-z0-9_]+)").unwrap()
    })
}

fn top_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| Regex::new(r"top\s*(\d+)?(?:\s+by\s+([a-z0-9_]+))?").unwrap())
}

fn agg_pattern() -> &'static Regex {
    static P: OnceLock<Regex> = OnceLock::new();
    P.get_or_init(|| {
        Regex::new(
            r"(sum|suma|avg|average|promedio|media|min|minimo|minimum|max|maximo|maximum)\s+(?:of\s+|de\s+)?([a-z0-9_]+)",
        )
        .unwrap()
    })
}

/// Lowercase and strip everything except letters, digits, underscores and
/// spaces. Underscores survive so column names stay extractable.
fn normalize(question: &str) -> String {
    let folded: String = question
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' => 'a',
            'é' => 'e',
            'í' => 'i',
            'ó' => 'o',
            'ú' | 'ü' => 'u',
            c if c.is_alphanumeric() || c == '_' => c,
            _ => ' ',
        })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub struct BasicQuery;

impl BasicQuery {
    /// Detect and run one supported operation over the frame.
    pub fn execute(question: &str, frame: &Frame) -> Result<BasicResult, BasicQueryError> {
        let normalized = normalize(question);

        if let Some(caps) = distinct_pattern().captures(&normalized) {
            return distinct(frame, &caps[1]);
        }
        if normalized.contains("top") {
            if let Some(caps) = top_pattern().captures(&normalized) {
                let n = caps
                    .get(1)
                    .and_then(|m| m.as_str().parse::<usize>().ok())
                    .unwrap_or(DEFAULT_TOP);
                let by = caps.get(2).map(|m| m.as_str().to_string());
                return top(frame, n, by.as_deref());
            }
        }
        if let Some(caps) = agg_pattern().captures(&normalized) {
            let op = match &caps[1] {
                "sum" | "suma" => BasicOperation::Sum,
                "avg" | "average" | "promedio" | "media" => BasicOperation::Avg,
                "min" | "minimo" | "minimum" => BasicOperation::Min,
                _ => BasicOperation::Max,
            };
            return aggregate(frame, op, &caps[2]);
        }
        if normalized.contains("count")
            || normalized.contains("cuantos")
            || normalized.contains("cuantas")
            || normalized.contains("how many")
        {
            return count(frame);
        }

        Err(BasicQueryError::UnsupportedOperation {
            question: question.to_string(),
            supported: SUPPORTED_OPERATIONS.to_vec(),
        })
    }
}

fn resolve(frame: &Frame, column: &str) -> Result<usize, BasicQueryError> {
    frame
        .resolve_column(column)
        .map(str::to_string)
        .and_then(|name| frame.column_index(&name))
        .ok_or_else(|| BasicQueryError::ColumnNotFound {
            column: column.to_string(),
            available: frame.columns.clone(),
        })
}

fn count(frame: &Frame) -> Result<BasicResult, BasicQueryError> {
    debug!(table = %frame.name, "basic count");
    Ok(BasicResult {
        operation: BasicOperation::Count,
        table: frame.name.clone(),
        columns: vec!["count".to_string()],
        rows: vec![vec![Value::Integer(frame.len() as i64)]],
        row_count: 1,
        confidence: 0.7,
        is_fallback: true,
    })
}

fn distinct(frame: &Frame, column: &str) -> Result<BasicResult, BasicQueryError> {
    let idx = resolve(frame, column)?;
    let name = frame.columns[idx].clone();
    let mut seen: Vec<String> = Vec::new();
    let mut values: Vec<Vec<Value>> = Vec::new();
    for cell in frame.column_values(idx) {
        if cell.is_null() {
            continue;
        }
        let key = cell.coerce_text();
        if !seen.contains(&key) {
            seen.push(key);
            values.push(vec![cell.clone()]);
            if values.len() >= DISTINCT_CAP {
                break;
            }
        }
    }
    let row_count = values.len();
    Ok(BasicResult {
        operation: BasicOperation::Distinct,
        table: frame.name.clone(),
        columns: vec![name],
        rows: values,
        row_count,
        confidence: 0.6,
        is_fallback: true,
    })
}

fn top(frame: &Frame, n: usize, by: Option<&str>) -> Result<BasicResult, BasicQueryError> {
    let mut rows = frame.rows.clone();
    if let Some(column) = by {
        let idx = resolve(frame, column)?;
        rows.sort_by(|a, b| b[idx].compare(&a[idx]));
    }
    rows.truncate(n);
    let row_count = rows.len();
    Ok(BasicResult {
        operation: BasicOperation::Top,
        table: frame.name.clone(),
        columns: frame.columns.clone(),
        rows,
        row_count,
        confidence: 0.6,
        is_fallback: true,
    })
}

fn aggregate(
    frame: &Frame,
    op: BasicOperation,
    column: &str,
) -> Result<BasicResult, BasicQueryError> {
    let idx = resolve(frame, column)?;
    let name = frame.columns[idx].clone();
    let numbers: Vec<f64> = frame
        .column_values(idx)
        .filter_map(Value::coerce_numeric)
        .collect();
    if numbers.is_empty() {
        return Err(BasicQueryError::NonNumericColumn { column: name });
    }
    let value = match op {
        BasicOperation::Sum => numbers.iter().sum::<f64>(),
        BasicOperation::Avg => numbers.iter().sum::<f64>() / numbers.len() as f64,
        BasicOperation::Min => numbers.iter().copied().fold(f64::INFINITY, f64::min),
        _ => numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    };
    let label = match op {
        BasicOperation::Sum => "sum",
        BasicOperation::Avg => "avg",
        BasicOperation::Min => "min",
        _ => "max",
    };
    Ok(BasicResult {
        operation: op,
        table: frame.name.clone(),
        columns: vec![format!("{}_{}", label, name.to_lowercase())],
        rows: vec![vec![Value::Float(value)]],
        row_count: 1,
        confidence: 0.6,
        is_fallback: true,
    })
}
