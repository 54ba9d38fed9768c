//! Result caching for repeated identical queries.
//!
//! The cache key is a SHA-256 digest of the canonical (sorted-keys) JSON of
//! every plan field that affects output, so two plans producing the same
//! rows always share an entry. Entries live for a fixed TTL and are expired
//! lazily on read; there is no size bound, which is an accepted limitation
//! at this scale.
//!
//! Both stores are constructed and injected, never process globals, so
//! engine instances in tests cannot contaminate each other.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::executor::QueryResult;
use crate::plan::QueryPlan;

pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Stable cache key for a plan.
pub fn cache_key(plan: &QueryPlan) -> String {
    // serde_json maps are sorted by key, so this rendering is canonical.
    let canonical = serde_json::to_string(
        &serde_json::to_value(plan).expect("plans serialize to plain JSON"),
    )
    .expect("JSON values render");
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

struct CacheEntry {
    result: QueryResult,
    expires_at: Instant,
}

/// TTL-bounded store of executed results.
pub struct QueryCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live entry. Expired entries are removed on the way.
    pub fn get(&self, key: &str) -> Option<QueryResult> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!(key = %&key[..8.min(key.len())], "cache hit");
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, result: QueryResult) {
        let entry = CacheEntry {
            result,
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local store of executed results keyed by their opaque table id,
/// so downstream consumers can fetch a prior result without re-executing.
#[derive(Default)]
pub struct TableRegistry {
    entries: Mutex<HashMap<String, QueryResult>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, result: QueryResult) {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .insert(result.table_id.clone(), result);
    }

    pub fn get(&self, table_id: &str) -> Option<QueryResult> {
        self.entries
            .lock()
            .expect("registry lock poisoned")
            .get(table_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::MetricSpec;
    use std::collections::BTreeMap;

    fn result(table_id: &str) -> QueryResult {
        QueryResult {
            table_id: table_id.to_string(),
            table: "orders".to_string(),
            columns: vec!["n".to_string()],
            rows: vec![vec![crate::value::Value::Integer(1)]],
            row_count: 1,
            rows_before_limit: 1,
            rows_truncated: false,
            schema: BTreeMap::new(),
            execution_time_ms: 0,
            cache_hit: false,
            source_rows: None,
        }
    }

    #[test]
    fn test_key_is_stable_and_field_sensitive() {
        let plan = QueryPlan::new("orders");
        let key = cache_key(&plan);
        assert_eq!(key.len(), 64);
        assert_eq!(key, cache_key(&plan));

        let mut other = QueryPlan::new("orders");
        other.metrics = vec![MetricSpec {
            name: "n".to_string(),
            expression: "COUNT(ORDER_ID)".to_string(),
        }];
        assert_ne!(key, cache_key(&other));
    }

    #[test]
    fn test_same_fields_same_key() {
        let a = QueryPlan::new("orders");
        let b = QueryPlan::new("orders");
        assert_eq!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = QueryCache::new();
        cache.put("k".to_string(), result("t_00000001"));
        let hit = cache.get("k").unwrap();
        assert_eq!(hit.table_id, "t_00000001");
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let cache = QueryCache::with_ttl(Duration::ZERO);
        cache.put("k".to_string(), result("t_00000001"));
        assert!(cache.get("k").is_none());
        // Lazy expiry removed the entry.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_registry_roundtrip() {
        let registry = TableRegistry::new();
        registry.put(result("t_cafe0123"));
        assert!(registry.get("t_cafe0123").is_some());
        assert!(registry.get("t_missing").is_none());
    }
}
