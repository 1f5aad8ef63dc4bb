//! Test helpers shared by the unit tests.

use crate::core::{ColumnInfo, DataSource, Dialect, ExecutionContext, Query, QueryEngine, Row};
use crate::engines::DataFusionEngine;
use crate::error::Result;
use arrow::array::{ArrayRef, Date32Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use datafusion::common::Constraints;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An engine answering every query with the same rows.
#[derive(Debug)]
pub struct StaticEngine {
    dialect: Dialect,
    rows: Vec<Row>,
    schema_calls: AtomicUsize,
}

impl StaticEngine {
    pub fn new(dialect: Dialect, rows: Vec<Row>) -> Self {
        Self {
            dialect,
            rows,
            schema_calls: AtomicUsize::new(0),
        }
    }

    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEngine for StaticEngine {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn fetch(&self, _query: &Query) -> Result<Vec<Row>> {
        Ok(self.rows.clone())
    }

    async fn schema(&self, _query: &Query) -> Result<Vec<ColumnInfo>> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ColumnInfo {
            name: "col".to_string(),
            data_type: "integer".to_string(),
        }])
    }

    async fn primary_keys(&self, _source: &DataSource) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Wraps an engine and counts the queries it executes.
#[derive(Debug)]
pub struct CountingEngine {
    inner: DataFusionEngine,
    fetches: AtomicUsize,
}

impl CountingEngine {
    pub fn new(inner: DataFusionEngine) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEngine for CountingEngine {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<Row>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(query).await
    }

    async fn schema(&self, query: &Query) -> Result<Vec<ColumnInfo>> {
        self.inner.schema(query).await
    }

    async fn primary_keys(&self, source: &DataSource) -> Result<Vec<String>> {
        self.inner.primary_keys(source).await
    }
}

/// A record batch from named columns; every field is nullable.
pub fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
}

/// A single BIGINT column.
pub fn int_table(column: &str, values: &[i64]) -> RecordBatch {
    batch(vec![(column, Arc::new(Int64Array::from(values.to_vec())) as ArrayRef)])
}

/// A single nullable BIGINT column.
pub fn nullable_int_table(column: &str, values: &[Option<i64>]) -> RecordBatch {
    batch(vec![(column, Arc::new(Int64Array::from(values.to_vec())) as ArrayRef)])
}

/// A single nullable VARCHAR column.
pub fn string_table(column: &str, values: &[Option<&str>]) -> RecordBatch {
    batch(vec![(column, Arc::new(StringArray::from(values.to_vec())) as ArrayRef)])
}

/// Days since the epoch for a `%Y-%m-%d` date.
pub fn date32(text: &str) -> i32 {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap();
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    (date - epoch).num_days() as i32
}

/// Columns `id`, `start_date` and `end_date`.
pub fn date_interval_table(rows: &[(i64, &str, &str)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("start_date", DataType::Date32, true),
        Field::new("end_date", DataType::Date32, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(
            rows.iter().map(|(id, _, _)| *id).collect::<Vec<_>>(),
        )),
        Arc::new(Date32Array::from(
            rows.iter().map(|(_, s, _)| date32(s)).collect::<Vec<_>>(),
        )),
        Arc::new(Date32Array::from(
            rows.iter().map(|(_, _, e)| date32(e)).collect::<Vec<_>>(),
        )),
    ];
    RecordBatch::try_new(schema, columns).unwrap()
}

/// Registers `batch` as `name` in the default schema.
pub fn register_batch(ctx: &SessionContext, name: &str, batch: RecordBatch) {
    let table = MemTable::try_new(batch.schema(), vec![vec![batch]]).unwrap();
    ctx.register_table(name, Arc::new(table)).unwrap();
}

/// Registers `batch` as `name` with a primary key over `key_columns`.
pub fn register_keyed_batch(ctx: &SessionContext, name: &str, batch: RecordBatch, key_columns: Vec<usize>) {
    let table = MemTable::try_new(batch.schema(), vec![vec![batch]])
        .unwrap()
        .with_constraints(Constraints::new_unverified(vec![
            datafusion::common::Constraint::PrimaryKey(key_columns),
        ]));
    ctx.register_table(name, Arc::new(table)).unwrap();
}

/// A DataFusion-backed execution context with `tables` registered.
pub fn datafusion_context(tables: Vec<(&str, RecordBatch)>) -> ExecutionContext {
    let session = SessionContext::new();
    for (name, batch) in tables {
        register_batch(&session, name, batch);
    }
    ExecutionContext::new(DataFusionEngine::new(session))
}

/// Reference to a table in DataFusion's default catalog and schema.
pub fn table(name: &str) -> DataSource {
    DataSource::table("datafusion", Some("public"), name)
}
