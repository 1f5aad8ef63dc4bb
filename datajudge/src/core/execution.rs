//! The query execution capability consumed by constraints.
//!
//! A [`QueryEngine`] executes rendered queries and answers catalog questions.
//! An [`ExecutionContext`] wraps one engine together with an identity, which
//! scopes memoized retrievals, and a [`MetadataCache`] with explicit
//! invalidation.

use super::data_source::DataSource;
use super::dialect::Dialect;
use super::query::Query;
use super::value::{Row, Value};
use crate::logging::{truncate_field, LogConfig};
use crate::prelude::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// Name and normalized SQL type of a result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Lowercase SQL type name, e.g. `integer` or `decimal(10, 2)`
    pub data_type: String,
}

/// Executes queries against one backend.
#[async_trait]
pub trait QueryEngine: Debug + Send + Sync {
    /// The SQL dialect this engine speaks.
    fn dialect(&self) -> Dialect;

    /// Executes `query` and returns all rows.
    async fn fetch(&self, query: &Query) -> Result<Vec<Row>>;

    /// Resolves the result columns of `query` without materializing rows.
    async fn schema(&self, query: &Query) -> Result<Vec<ColumnInfo>>;

    /// Declared primary key columns of `source`, in key order.
    async fn primary_keys(&self, source: &DataSource) -> Result<Vec<String>>;

    /// Renders `query` for display in failure reports.
    fn compile(&self, query: &Query) -> String {
        query.sql().to_string()
    }
}

/// Identity of an execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Reflected schemas and primary keys, keyed by query text and source.
#[derive(Debug, Default)]
pub struct MetadataCache {
    schemas: RwLock<HashMap<String, Vec<ColumnInfo>>>,
    primary_keys: RwLock<HashMap<DataSource, Vec<String>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached entry.
    pub async fn invalidate(&self) {
        self.schemas.write().await.clear();
        self.primary_keys.write().await.clear();
    }

    /// Number of cached schema entries.
    pub async fn len(&self) -> usize {
        self.schemas.read().await.len() + self.primary_keys.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// An engine handle plus identity, metadata cache and logging settings.
///
/// Clones share identity and cache. Use [`ExecutionContext::fresh`] for a
/// context over the same engine whose memoized results start empty, e.g.
/// after the underlying data changed.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    engine: Arc<dyn QueryEngine>,
    id: ContextId,
    metadata: Arc<MetadataCache>,
    log_config: LogConfig,
}

impl ExecutionContext {
    pub fn new(engine: impl QueryEngine + 'static) -> Self {
        Self::from_engine(Arc::new(engine))
    }

    pub fn from_engine(engine: Arc<dyn QueryEngine>) -> Self {
        Self {
            engine,
            id: ContextId::next(),
            metadata: Arc::new(MetadataCache::new()),
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    /// A new identity with an empty metadata cache over the same engine.
    pub fn fresh(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            id: ContextId::next(),
            metadata: Arc::new(MetadataCache::new()),
            log_config: self.log_config.clone(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn dialect(&self) -> Dialect {
        self.engine.dialect()
    }

    pub fn engine(&self) -> &dyn QueryEngine {
        self.engine.as_ref()
    }

    pub fn metadata(&self) -> &MetadataCache {
        &self.metadata
    }

    pub fn log_config(&self) -> &LogConfig {
        &self.log_config
    }

    /// Renders `query` for failure reports.
    pub fn compile(&self, query: &Query) -> String {
        self.engine.compile(query)
    }

    /// Executes `query` and returns all rows.
    pub async fn fetch(&self, query: &Query) -> Result<Vec<Row>> {
        crate::log_query!(
            self.log_config,
            query.sql = %truncate_field(query.sql(), self.log_config.max_field_length),
            engine.dialect = %self.dialect(),
            "Executing query"
        );
        self.engine.fetch(query).await
    }

    /// First value of the first row, or `Value::Null` for an empty result.
    pub async fn fetch_scalar(&self, query: &Query) -> Result<Value> {
        let rows = self.fetch(query).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .unwrap_or(Value::Null))
    }

    /// First value of the first row as an integer count.
    pub async fn fetch_count(&self, query: &Query) -> Result<i64> {
        match self.fetch_scalar(query).await? {
            Value::Null => Ok(0),
            value => value.as_i64().ok_or_else(|| JudgeError::TypeMismatch {
                expected: "integer count".to_string(),
                found: value.to_string(),
            }),
        }
    }

    /// Result columns of `query`, memoized in the metadata cache.
    #[instrument(skip(self, query), fields(context.id = self.id.0))]
    pub async fn schema(&self, query: &Query) -> Result<Vec<ColumnInfo>> {
        if let Some(cached) = self.metadata.schemas.read().await.get(query.sql()) {
            return Ok(cached.clone());
        }
        let columns = self.engine.schema(query).await?;
        debug!(columns.count = columns.len(), "Reflected schema");
        self.metadata
            .schemas
            .write()
            .await
            .insert(query.sql().to_string(), columns.clone());
        Ok(columns)
    }

    /// Primary key columns of `source`, memoized in the metadata cache.
    pub async fn primary_keys(&self, source: &DataSource) -> Result<Vec<String>> {
        let dialect = self.dialect();
        if !dialect.supports_primary_keys() {
            return Err(JudgeError::unsupported("primary key retrieval", dialect));
        }
        if !matches!(source, DataSource::Table { .. }) {
            return Err(JudgeError::unsupported(
                format!("primary key retrieval on non-table source {source}"),
                dialect,
            ));
        }
        if let Some(cached) = self.metadata.primary_keys.read().await.get(source) {
            return Ok(cached.clone());
        }
        let keys = self.engine.primary_keys(source).await?;
        self.metadata
            .primary_keys
            .write()
            .await
            .insert(source.clone(), keys.clone());
        Ok(keys)
    }
}
