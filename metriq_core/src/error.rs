//! Typed failure taxonomy.
//!
//! Every error here is a branchable condition the caller is expected to act
//! on (disambiguation prompts, corrective re-asks), so they are concrete
//! enums rather than opaque `anyhow` chains. Nothing in this module is
//! retried internally; a failure is final for the call that produced it.

use serde::Serialize;
use thiserror::Error;

/// A near-miss candidate attached to resolution failures so the caller can
/// build a disambiguation prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub metric: String,
    pub score: f64,
    pub alias_matched: String,
}

#[derive(Debug, Clone, Error)]
pub enum DictionaryError {
    #[error("table '{0}' not found in data dictionary")]
    TableNotFound(String),
    #[error("metric '{0}' not found in data dictionary")]
    MetricNotFound(String),
}

/// Semantic resolution failures. All three are expected, user-correctable
/// conditions and are never silently defaulted.
#[derive(Debug, Clone, Error)]
pub enum ResolveError {
    /// No candidate metric cleared the acceptance threshold.
    #[error("no metric matched '{question}' above the acceptance threshold")]
    UnresolvedMetric {
        question: String,
        suggestions: Vec<Suggestion>,
    },
    /// Two or more metrics cleared the threshold within the ambiguity margin.
    #[error("question '{question}' matched {n} metrics too closely to pick one", n = candidates.len())]
    AmbiguousMetric {
        question: String,
        candidates: Vec<Suggestion>,
    },
    /// The resolved metric's owning table is not available to the caller.
    #[error("metric table '{table}' is not among the available tables {available_tables:?}")]
    NoTableMatch {
        table: String,
        available_tables: Vec<String>,
    },
}

/// Query execution failures. Each is terminal for a single execution.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Type coercion failure: nulls in a referenced column, non-numeric
    /// values under a numeric operator, or unparseable dates.
    #[error("type mismatch in column '{column}': {message}")]
    TypeMismatch { column: String, message: String },

    /// Filters (or the period restriction) eliminated every row. This is a
    /// hard failure by contract, not an empty-table success.
    #[error("filters eliminated all rows of '{table}': {detail}")]
    EmptyResult { table: String, detail: String },

    #[error("missing columns in '{table}': {columns:?}")]
    ColumnNotFound { table: String, columns: Vec<String> },

    #[error("table '{table}' not found")]
    TableNotFound { table: String },

    /// The dataset exists but could not be read or parsed.
    #[error("failed to load table '{table}': {message}")]
    LoadFailed { table: String, message: String },

    /// Expression outside the closed aggregation grammar.
    #[error("unsupported metric expression: {expression}")]
    UnsupportedMetric { expression: String },
}

/// Basic-query fallback failures.
#[derive(Debug, Clone, Error)]
pub enum BasicQueryError {
    #[error("no supported basic operation detected in '{question}' (supported: {supported:?})")]
    UnsupportedOperation {
        question: String,
        supported: Vec<&'static str>,
    },
    #[error("table '{table}' not found")]
    TableNotFound { table: String },
    #[error("column '{column}' not found (available: {available:?})")]
    ColumnNotFound {
        column: String,
        available: Vec<String>,
    },
    #[error("column '{column}' contains no numeric values")]
    NonNumericColumn { column: String },
}
