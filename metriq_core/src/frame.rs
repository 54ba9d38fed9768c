use crate::value::{DataType, Value};

/// An in-memory tabular dataset: named columns over row-major values.
///
/// Each row remembers its 0-based position in the source file's data section
/// (`source_rows`), so row-level audit evidence can point back at the exact
/// file rows even after filtering.
#[derive(Debug, Clone)]
pub struct Frame {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub source_rows: Vec<usize>,
}

impl Frame {
    pub fn new(name: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let source_rows = (0..rows.len()).collect();
        Self {
            name: name.into(),
            columns,
            rows,
            source_rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Case-insensitive column lookup, returning the actual column name.
    pub fn resolve_column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.eq_ignore_ascii_case(name))
            .map(|c| c.as_str())
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn null_count(&self, idx: usize) -> usize {
        self.column_values(idx).filter(|v| v.is_null()).count()
    }

    /// A column is numeric when every non-null cell is an integer or float.
    /// Mirrors a numeric dtype check: text that happens to parse does not
    /// make a column numeric.
    pub fn column_is_numeric(&self, idx: usize) -> bool {
        self.column_values(idx).all(|v| {
            matches!(
                v.data_type(),
                DataType::Integer | DataType::Float | DataType::Null
            )
        })
    }

    /// Inferred column type for the result schema: integer stays integer,
    /// any float promotes the column, otherwise the first non-null type wins.
    pub fn column_type(&self, idx: usize) -> DataType {
        let mut seen = DataType::Null;
        for v in self.column_values(idx) {
            match (seen, v.data_type()) {
                (_, DataType::Null) => {}
                (DataType::Null, t) => seen = t,
                (DataType::Integer, DataType::Float) => seen = DataType::Float,
                _ => {}
            }
        }
        seen
    }

    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.columns.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Keep only the rows whose mask entry is true, preserving order and
    /// the source-row bookkeeping.
    pub fn retain_rows(&mut self, mask: &[bool]) {
        debug_assert_eq!(mask.len(), self.rows.len());
        let mut keep = mask.iter();
        self.rows.retain(|_| *keep.next().unwrap_or(&false));
        let mut keep = mask.iter();
        self.source_rows.retain(|_| *keep.next().unwrap_or(&false));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::new(
            "orders",
            vec!["id".into(), "amount".into(), "status".into()],
            vec![
                vec![Value::Integer(1), Value::Float(10.0), Value::Text("delivered".into())],
                vec![Value::Integer(2), Value::Float(20.0), Value::Text("cancelled".into())],
                vec![Value::Integer(3), Value::Null, Value::Text("delivered".into())],
            ],
        )
    }

    #[test]
    fn test_retain_rows_tracks_source_positions() {
        let mut f = sample();
        f.retain_rows(&[true, false, true]);
        assert_eq!(f.len(), 2);
        assert_eq!(f.source_rows, vec![0, 2]);
    }

    #[test]
    fn test_column_typing() {
        let f = sample();
        assert_eq!(f.column_type(0), DataType::Integer);
        assert_eq!(f.column_type(1), DataType::Float);
        assert_eq!(f.column_type(2), DataType::Text);
        assert!(f.column_is_numeric(1));
        assert!(!f.column_is_numeric(2));
        assert_eq!(f.null_count(1), 1);
    }

    #[test]
    fn test_resolve_column_is_case_insensitive() {
        let f = sample();
        assert_eq!(f.resolve_column("AMOUNT"), Some("amount"));
        assert_eq!(f.resolve_column("missing"), None);
    }
}
