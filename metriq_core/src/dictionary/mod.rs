//! The data dictionary: canonical metric and table definitions.
//!
//! The dictionary never invents metrics; semantic resolution only maps user
//! text onto the definitions registered here. It is loaded once at startup
//! (an invalid definition file is a fatal construction error) and read-only
//! afterwards, so shared references across threads need no synchronization.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::error::DictionaryError;
use crate::plan::FilterCondition;
use crate::resolver::fuzzy;

const DEFAULT_DICTIONARY: &str = include_str!("default.json");

/// Canonical definition of one metric: what to compute, over which table,
/// which columns it needs, which filters always apply, and which phrasings
/// users are allowed to reach it by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    #[serde(default)]
    pub name: String,
    pub description: String,
    pub table: String,
    pub expression: String,
    pub data_type: String,
    pub requires: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    pub aliases: Vec<String>,
    pub format: String,
    #[serde(default)]
    pub business_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Metadata about a queryable table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDefinition {
    #[serde(default)]
    pub name: String,
    pub description: String,
    /// What one row represents, e.g. "one order line".
    pub grain: String,
    pub primary_key: String,
    #[serde(default)]
    pub time_column: Option<String>,
    pub columns: BTreeMap<String, ColumnMeta>,
}

#[derive(Debug, Deserialize)]
struct DictionaryFile {
    version: String,
    updated_at: String,
    tables: BTreeMap<String, TableDefinition>,
    metrics: BTreeMap<String, MetricDefinition>,
}

/// Read-only registry of canonical metrics and tables.
#[derive(Debug, Clone)]
pub struct Dictionary {
    pub version: String,
    pub updated_at: String,
    tables: BTreeMap<String, TableDefinition>,
    metrics: BTreeMap<String, MetricDefinition>,
}

impl Dictionary {
    /// Load the built-in dictionary definition.
    pub fn from_default() -> anyhow::Result<Self> {
        Self::from_json(DEFAULT_DICTIONARY)
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading dictionary file {}", path.display()))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let mut file: DictionaryFile =
            serde_json::from_str(raw).context("parsing data dictionary definition")?;

        for (name, table) in file.tables.iter_mut() {
            table.name = name.clone();
        }
        for (name, metric) in file.metrics.iter_mut() {
            metric.name = name.clone();
            if !file.tables.contains_key(&metric.table) {
                bail!(
                    "metric '{}' references unknown table '{}'",
                    name,
                    metric.table
                );
            }
            if metric.expression.trim().is_empty() {
                bail!("metric '{}' has an empty expression", name);
            }
        }

        Ok(Self {
            version: file.version,
            updated_at: file.updated_at,
            tables: file.tables,
            metrics: file.metrics,
        })
    }

    pub fn get_table(&self, name: &str) -> Result<&TableDefinition, DictionaryError> {
        self.tables
            .get(name)
            .ok_or_else(|| DictionaryError::TableNotFound(name.to_string()))
    }

    pub fn get_metric(&self, name: &str) -> Result<&MetricDefinition, DictionaryError> {
        self.metrics
            .get(name)
            .ok_or_else(|| DictionaryError::MetricNotFound(name.to_string()))
    }

    pub fn list_tables(&self) -> Vec<&str> {
        self.tables.keys().map(|k| k.as_str()).collect()
    }

    /// All metric names, optionally restricted to one owning table.
    pub fn list_metrics(&self, table: Option<&str>) -> Vec<&str> {
        self.metrics
            .iter()
            .filter(|(_, m)| table.map_or(true, |t| m.table == t))
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Single-term convenience matcher: map one user term to the canonical
    /// metric whose name or alias scores best, or None below the threshold
    /// (0.0..=1.0 scale).
    pub fn fuzzy_match_metric(&self, user_term: &str, threshold: f64) -> Option<&str> {
        let term = user_term.trim().to_lowercase();
        let mut best: Option<(&str, f64)> = None;
        for (name, metric) in &self.metrics {
            let mut candidates: Vec<&str> = vec![name.as_str()];
            candidates.extend(metric.aliases.iter().map(|a| a.as_str()));
            for alias in candidates {
                let score = fuzzy::ratio(&term, &alias.to_lowercase());
                if score >= threshold * 100.0
                    && best.map_or(true, |(_, prev)| score > prev)
                {
                    best = Some((name.as_str(), score));
                }
            }
        }
        best.map(|(name, _)| name)
    }
}
