//! The query engine: loading, caching, execution, and result retention.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::basic::{BasicQuery, BasicResult};
use crate::cache::{cache_key, QueryCache, TableRegistry};
use crate::error::{BasicQueryError, QueryError};
use crate::executor::{execute_plan, QueryResult};
use crate::loader::TableLoader;
use crate::plan::QueryPlan;

/// Executes plans with at-most-one execution per identical parameter set
/// within the cache TTL. Instances are independent; nothing is shared
/// through globals.
pub struct QueryEngine {
    loader: Arc<dyn TableLoader>,
    cache: QueryCache,
    registry: TableRegistry,
}

impl QueryEngine {
    pub fn new(loader: Arc<dyn TableLoader>) -> Self {
        Self {
            loader,
            cache: QueryCache::new(),
            registry: TableRegistry::new(),
        }
    }

    pub fn with_cache_ttl(loader: Arc<dyn TableLoader>, ttl: Duration) -> Self {
        Self {
            loader,
            cache: QueryCache::with_ttl(ttl),
            registry: TableRegistry::new(),
        }
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.loader.list_tables()
    }

    /// Execute a plan, serving identical requests from cache within TTL.
    /// Cache hits report only the lookup time.
    pub fn execute(&self, plan: &QueryPlan) -> Result<QueryResult, QueryError> {
        let key = cache_key(plan);
        let lookup = Instant::now();
        if let Some(mut hit) = self.cache.get(&key) {
            hit.cache_hit = true;
            hit.execution_time_ms = lookup.elapsed().as_millis() as u64;
            return Ok(hit);
        }

        let frame = self.loader.load_table(&plan.table)?;
        let result = execute_plan(plan, frame)?;
        info!(
            table = %plan.table,
            table_id = %result.table_id,
            rows = result.row_count,
            ms = result.execution_time_ms,
            "query executed"
        );
        self.registry.put(result.clone());
        self.cache.put(key, result.clone());
        Ok(result)
    }

    /// Fetch a previously executed result by its opaque identifier.
    pub fn result_by_id(&self, table_id: &str) -> Option<QueryResult> {
        self.registry.get(table_id)
    }

    /// Dictionary-free fallback path.
    pub fn basic_execute(
        &self,
        question: &str,
        table: &str,
    ) -> Result<BasicResult, BasicQueryError> {
        let frame = self.loader.load_table(table).map_err(|e| match e {
            QueryError::TableNotFound { table } => BasicQueryError::TableNotFound { table },
            other => BasicQueryError::TableNotFound {
                table: format!("{} ({})", table, other),
            },
        })?;
        debug!(table, "running basic fallback");
        BasicQuery::execute(question, &frame)
    }
}
