//! Continuity of an integer column within groups.

use crate::core::{
    ConstraintCore, DataReference, ExecutionContext, Retrieval, Retrieve, Value, Verdict,
};
use crate::db_access;
use crate::prelude::*;
use crate::security::InputValidator;
use crate::utils::format_values;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Groups with their aggregated values.
pub type Groups = Vec<(Value, Vec<Value>)>;

/// For every group of the reference's columns, the values of
/// `aggregation_column` must cover `start_value..=max` without holes.
///
/// Fails when the share of groups with holes exceeds `tolerance`.
#[derive(Debug)]
pub struct GroupByAggregation {
    core: ConstraintCore<Groups, ()>,
    aggregation_column: String,
    start_value: i64,
    tolerance: f64,
}

impl GroupByAggregation {
    pub fn new(
        core: ConstraintCore<Groups, ()>,
        aggregation_column: impl Into<String>,
        start_value: i64,
        tolerance: f64,
    ) -> Result<Self> {
        InputValidator::validate_fraction(tolerance, "tolerance")?;
        Ok(Self {
            core,
            aggregation_column: aggregation_column.into(),
            start_value,
            tolerance,
        })
    }

    /// Values of `start_value..=max(values)` absent from `values`.
    fn missing_values(&self, values: &[Value]) -> Result<Vec<i64>> {
        let present = values
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| {
                v.as_i64().ok_or_else(|| JudgeError::TypeMismatch {
                    expected: "integer".to_string(),
                    found: v.to_string(),
                })
            })
            .collect::<Result<BTreeSet<i64>>>()?;
        let Some(&max) = present.last() else {
            return Ok(Vec::new());
        };
        Ok((self.start_value..=max).filter(|v| !present.contains(v)).collect())
    }
}

#[async_trait]
impl Retrieve for GroupByAggregation {
    type Factual = Groups;
    type Target = ();

    fn kind(&self) -> &'static str {
        "AggregateNumericRangeEquality"
    }

    fn core(&self) -> &ConstraintCore<Groups, ()> {
        &self.core
    }

    async fn retrieve_factual(&self, ctx: &ExecutionContext, reference: &DataReference) -> Result<Retrieval<Groups>> {
        db_access::column_array_agg(ctx, reference, &self.aggregation_column).await
    }

    async fn retrieve_target(&self, _ctx: &ExecutionContext, _reference: &DataReference) -> Result<Retrieval<()>> {
        Err(JudgeError::configuration("GroupByAggregation has no target reference."))
    }
}

impl crate::core::Compare for GroupByAggregation {
    fn compare(&self, groups: &Groups, _target: &()) -> Result<Verdict> {
        if groups.is_empty() {
            return Ok(Verdict::pass_with("No groups."));
        }
        let mut failing = Vec::new();
        for (key, values) in groups {
            let missing = self.missing_values(values)?;
            if !missing.is_empty() {
                let missing: Vec<Value> = missing.into_iter().map(Value::Int).collect();
                failing.push(format!("({key}, {})", format_values(&missing)));
            }
        }
        let fraction = failing.len() as f64 / groups.len() as f64;
        Ok(Verdict::check(fraction <= self.tolerance, || {
            format!(
                "{} has unfulfilled continuity requirement for (key, missing values): `{}`.{}",
                self.core.reference,
                failing.join(", "),
                self.core.condition_string()
            )
        }))
    }
}
