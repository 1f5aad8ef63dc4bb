//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::NaiveDate;
use datafusion::prelude::SessionContext;
use datajudge::core::{
    ColumnInfo, DataSource, Dialect, ExecutionContext, Query, QueryEngine, Row,
};
use datajudge::engines::DataFusionEngine;
use datajudge::prelude::Result;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Columns of a test table, all nullable.
pub fn batch(columns: Vec<(&str, ArrayRef)>) -> RecordBatch {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| Field::new(*name, array.data_type().clone(), true))
        .collect();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
}

pub fn int_column(values: impl IntoIterator<Item = i64>) -> ArrayRef {
    Arc::new(Int64Array::from(values.into_iter().collect::<Vec<_>>()))
}

pub fn float_column(values: impl IntoIterator<Item = f64>) -> ArrayRef {
    Arc::new(Float64Array::from(values.into_iter().collect::<Vec<_>>()))
}

/// `values` in a reproducible random order.
pub fn shuffled<T>(mut values: Vec<T>, seed: u64) -> Vec<T> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    values.shuffle(&mut rng);
    values
}

pub fn string_column(values: &[&str]) -> ArrayRef {
    Arc::new(StringArray::from(values.to_vec()))
}

fn days_since_epoch(text: &str) -> i32 {
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap();
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    (date - epoch).num_days() as i32
}

pub fn date_column(values: &[&str]) -> ArrayRef {
    Arc::new(Date32Array::from(
        values.iter().map(|v| days_since_epoch(v)).collect::<Vec<_>>(),
    ))
}

/// `id`, `start_date` and `end_date` columns, one row per range.
pub fn date_ranges(rows: &[(i64, &str, &str)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("start_date", DataType::Date32, true),
        Field::new("end_date", DataType::Date32, true),
    ]));
    let starts: Vec<&str> = rows.iter().map(|(_, s, _)| *s).collect();
    let ends: Vec<&str> = rows.iter().map(|(_, _, e)| *e).collect();
    RecordBatch::try_new(
        schema,
        vec![
            int_column(rows.iter().map(|(id, _, _)| *id)),
            date_column(&starts),
            date_column(&ends),
        ],
    )
    .unwrap()
}

pub fn session(tables: Vec<(&str, RecordBatch)>) -> SessionContext {
    let session = SessionContext::new();
    for (name, batch) in tables {
        session.register_batch(name, batch).unwrap();
    }
    session
}

pub fn context(tables: Vec<(&str, RecordBatch)>) -> ExecutionContext {
    ExecutionContext::new(DataFusionEngine::new(session(tables)))
}

pub const DB: &str = "datafusion";
pub const SCHEMA: Option<&str> = Some("public");

pub fn table(name: &str) -> DataSource {
    DataSource::table(DB, SCHEMA, name)
}

/// Counts the queries issued through a DataFusion engine.
#[derive(Debug)]
pub struct CountingEngine {
    inner: DataFusionEngine,
    fetches: Arc<AtomicUsize>,
}

impl CountingEngine {
    /// The engine and a handle to its fetch counter.
    pub fn new(session: SessionContext) -> (Self, Arc<AtomicUsize>) {
        let fetches = Arc::new(AtomicUsize::new(0));
        let engine = Self {
            inner: DataFusionEngine::new(session),
            fetches: Arc::clone(&fetches),
        };
        (engine, fetches)
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
