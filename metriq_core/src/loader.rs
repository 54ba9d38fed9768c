//! Dataset loading.
//!
//! The engine only knows the [`TableLoader`] contract; the file format is
//! the loader's concern. [`CsvLoader`] reads `<root>/<table>.csv` with
//! light type sniffing per cell. [`MemoryLoader`] serves pre-built frames
//! and counts loads, which makes cache behavior observable in tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::error::QueryError;
use crate::frame::Frame;
use crate::value::Value;

pub trait TableLoader: Send + Sync {
    /// Load the named table. Must fail with `TableNotFound` if absent.
    fn load_table(&self, table: &str) -> Result<Frame, QueryError>;

    /// Names of the tables this loader can serve.
    fn list_tables(&self) -> Vec<String>;
}

/// Loads `<root>/<table>.csv` files, matching file stems case-insensitively.
pub struct CsvLoader {
    root: PathBuf,
}

impl CsvLoader {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn table_path(&self, table: &str) -> Option<PathBuf> {
        let wanted = table.to_lowercase();
        std::fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
                    && path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|s| s.to_lowercase() == wanted)
            })
    }
}

impl TableLoader for CsvLoader {
    fn load_table(&self, table: &str) -> Result<Frame, QueryError> {
        let Some(path) = self.table_path(table) else {
            return Err(QueryError::TableNotFound {
                table: table.to_string(),
            });
        };
        let mut reader =
            csv::Reader::from_path(&path).map_err(|e| QueryError::LoadFailed {
                table: table.to_string(),
                message: e.to_string(),
            })?;
        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| QueryError::LoadFailed {
                table: table.to_string(),
                message: e.to_string(),
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| QueryError::LoadFailed {
                table: table.to_string(),
                message: e.to_string(),
            })?;
            rows.push(record.iter().map(sniff_cell).collect());
        }
        debug!(table, rows = rows.len(), "loaded csv table");
        Ok(Frame::new(table, columns, rows))
    }

    fn list_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = std::fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
                {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .collect();
        tables.sort_unstable();
        tables
    }
}

/// Infer the narrowest value type for a raw CSV cell.
fn sniff_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        _ => Value::Text(trimmed.to_string()),
    }
}

/// In-memory loader with a load counter.
#[derive(Default)]
pub struct MemoryLoader {
    tables: HashMap<String, Frame>,
    loads: AtomicUsize,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, frame: Frame) -> Self {
        self.tables.insert(frame.name.clone(), frame);
        self
    }

    /// How many times `load_table` has succeeded.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

impl TableLoader for MemoryLoader {
    fn load_table(&self, table: &str) -> Result<Frame, QueryError> {
        let frame = self
            .tables
            .get(table)
            .cloned()
            .ok_or_else(|| QueryError::TableNotFound {
                table: table.to_string(),
            })?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(frame)
    }

    fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, content: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_csv_loading_and_sniffing() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(
            dir.path(),
            "orders.csv",
            "ORDER_ID,ORDER_AMOUNT,ORDER_STATUS,FLAG\no1,10.5,delivered,true\no2,20,cancelled,\n",
        );
        let loader = CsvLoader::new(dir.path());
        let frame = loader.load_table("orders").unwrap();
        assert_eq!(frame.columns.len(), 4);
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.rows[0][1], Value::Float(10.5));
        assert_eq!(frame.rows[1][1], Value::Integer(20));
        assert_eq!(frame.rows[0][3], Value::Boolean(true));
        assert_eq!(frame.rows[1][3], Value::Null);
    }

    #[test]
    fn test_table_stem_matches_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "Orders.CSV", "ORDER_ID\no1\n");
        let loader = CsvLoader::new(dir.path());
        let frame = loader.load_table("orders").unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.name, "orders");
    }

    #[test]
    fn test_missing_table_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let loader = CsvLoader::new(dir.path());
        assert!(matches!(
            loader.load_table("ghost"),
            Err(QueryError::TableNotFound { .. })
        ));
    }

    #[test]
    fn test_list_tables_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "b.csv", "x\n1\n");
        write_csv(dir.path(), "a.csv", "x\n1\n");
        write_csv(dir.path(), "notes.txt", "ignored");
        let loader = CsvLoader::new(dir.path());
        assert_eq!(loader.list_tables(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_memory_loader_counts() {
        let loader = MemoryLoader::new().with_table(Frame::new(
            "t",
            vec!["x".to_string()],
            vec![vec![Value::Integer(1)]],
        ));
        assert_eq!(loader.load_count(), 0);
        loader.load_table("t").unwrap();
        loader.load_table("t").unwrap();
        assert_eq!(loader.load_count(), 2);
        assert!(loader.load_table("missing").is_err());
    }
}
