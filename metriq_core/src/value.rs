use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
    Null,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::Text => "text",
            DataType::Boolean => "boolean",
            DataType::Null => "null",
        }
    }
}

/// A single cell value. All coercion between types goes through the explicit
/// helpers below; comparison operators never coerce implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
    Null,
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Text(_) => DataType::Text,
            Value::Boolean(_) => DataType::Boolean,
            Value::Null => DataType::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric coercion. Integers and floats pass through; text is parsed.
    /// Booleans are deliberately not numeric (a `true` filter value against
    /// an amount column is a caller bug, not a 1.0).
    pub fn coerce_numeric(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse::<f64>().ok(),
            Value::Boolean(_) | Value::Null => None,
        }
    }

    /// Text coercion used for string-side comparisons, IN membership and
    /// group keys. Whole floats render without a trailing `.0` so that
    /// `10`, `10.0` and `"10"` land on the same key.
    pub fn coerce_text(&self) -> String {
        match self {
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            Value::Text(s) => s.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Null => String::new(),
        }
    }

    /// Ordering used for ORDER BY and the deterministic group sort: numbers
    /// compare numerically, everything else falls back to text.
    pub fn compare(&self, other: &Value) -> std::cmp::Ordering {
        match (self.coerce_numeric(), other.coerce_numeric()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal),
            _ => self.coerce_text().cmp(&other.coerce_text()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, ""),
            other => write!(f, "{}", other.coerce_text()),
        }
    }
}
